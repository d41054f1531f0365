use std::collections::HashMap;

use image::DynamicImage;

/// Channel ceiling (inclusive, 0-255) under which an average reads as black.
const NEAR_BLACK_CHANNEL: u64 = 22;

/// RGBA colour with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorValue {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl ColorValue {
    pub const DARK_GRAY: Self = Self {
        red: 1.0 / 3.0,
        green: 1.0 / 3.0,
        blue: 1.0 / 3.0,
        alpha: 1.0,
    };

    pub fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn from_rgba8([r, g, b, a]: [u8; 4]) -> Self {
        Self::new(
            f64::from(r) / 255.0,
            f64::from(g) / 255.0,
            f64::from(b) / 255.0,
            f64::from(a) / 255.0,
        )
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.red), q(self.green), q(self.blue), q(self.alpha)]
    }

    /// `#rrggbbaa`
    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
    }
}

/// Area average over every pixel of `image`.
///
/// Returns `None` for an empty or fully transparent image. Near-black
/// averages are lifted to [`ColorValue::DARK_GRAY`] so a tinted backdrop
/// stays visible.
pub fn average_color(image: &DynamicImage) -> Option<ColorValue> {
    let rgba = image.to_rgba8();
    let count = u64::from(rgba.width()) * u64::from(rgba.height());
    if count == 0 {
        return None;
    }

    let (mut r_sum, mut g_sum, mut b_sum, mut a_sum) = (0u64, 0u64, 0u64, 0u64);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        r_sum += u64::from(r);
        g_sum += u64::from(g);
        b_sum += u64::from(b);
        a_sum += u64::from(a);
    }

    if a_sum == 0 {
        return None;
    }

    let avg = |sum: u64| ((sum + count / 2) / count).min(255);
    let (r, g, b, a) = (avg(r_sum), avg(g_sum), avg(b_sum), avg(a_sum));

    if r <= NEAR_BLACK_CHANNEL && g <= NEAR_BLACK_CHANNEL && b <= NEAR_BLACK_CHANNEL {
        return Some(ColorValue::DARK_GRAY);
    }

    Some(ColorValue::from_rgba8([r as u8, g as u8, b as u8, a as u8]))
}

/// Derived colours keyed by image key.
///
/// A stored `None` means "derived, but the image had no usable colour";
/// a missing entry means "not derived yet".
#[derive(Debug, Default)]
pub struct ColorCache {
    entries: HashMap<String, Option<ColorValue>>,
}

impl ColorCache {
    pub fn get(&self, key: &str) -> Option<Option<ColorValue>> {
        self.entries.get(key).copied()
    }

    pub fn insert(&mut self, key: String, color: Option<ColorValue>) {
        self.entries.insert(key, color);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}
