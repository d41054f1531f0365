use std::{
    borrow::Cow,
    fmt,
    path::{Component, Path, PathBuf},
};

use url::Url;

use crate::error::{FetchError, Result};

/// Stable key for an image resource.
///
/// The key is the URL path followed by its query parameters rendered as
/// `name=value` and concatenated without a separator. Both are
/// percent-decoded, and an item without `=` renders as its bare name. Scheme
/// and host are dropped, so two URLs that only differ by host share one cache
/// entry.
#[derive(Clone)]
pub struct ImageKey {
    key: String,
    url: Url,
}

impl ImageKey {
    pub fn new(url: Url) -> Self {
        let key = key_for_url(&url);
        Self { key, url }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|err| FetchError::InvalidUrl(format!("{input}: {err}")))?;
        Ok(Self::new(url))
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path of this key relative to a disk cache root.
    ///
    /// Slashes produce nested directories. Empty, `.` and `..` segments are
    /// dropped so a key never resolves outside the root. Returns `None` when
    /// nothing usable remains.
    pub fn relative_path(&self) -> Option<PathBuf> {
        let mut out = PathBuf::new();
        for segment in self.key.split('/') {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(part)), None) => out.push(part),
                _ => continue,
            }
        }
        if out.as_os_str().is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

impl PartialEq for ImageKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ImageKey {}

impl std::hash::Hash for ImageKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImageKey").field(&self.key).finish()
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<Url> for ImageKey {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

impl std::str::FromStr for ImageKey {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn key_for_url(url: &Url) -> String {
    let mut key = decode_component(url.path()).into_owned();
    let Some(query) = url.query() else {
        return key;
    };
    for item in query.split('&').filter(|item| !item.is_empty()) {
        match item.split_once('=') {
            Some((name, value)) => {
                key.push_str(&decode_component(name));
                key.push('=');
                key.push_str(&decode_component(value));
            }
            None => key.push_str(&decode_component(item)),
        }
    }
    key
}

/// Percent-decoded text, or the raw text when it is not valid UTF-8 once decoded.
fn decode_component(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}
