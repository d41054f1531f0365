//! # imgcache-core
//!
//! Single-flight image fetch cache with a memory tier and an optional disk
//! tier.
//!
//! A [`ImageDownloader`] resolves an image URL in this order:
//!
//! 1. a ready image in memory,
//! 2. a copy persisted on disk (promoted into memory),
//! 3. a fetch already in flight for the same key (joined, never duplicated),
//! 4. a new network fetch.
//!
//! Successful images are kept in memory, sampled for an average colour and
//! written to disk. Failed fetches leave nothing behind so the next request
//! retries.
//!
//! ```no_run
//! use imgcache_core::{CacheConfig, ImageDownloader, ImageKey};
//!
//! async fn warm(urls: &[&str]) -> Result<(), imgcache_core::FetchError> {
//!     let downloader = ImageDownloader::new(
//!         CacheConfig::default().with_disk_dir("/tmp/imgcache"),
//!     )?;
//!     let keys = urls
//!         .iter()
//!         .map(|u| ImageKey::parse(u))
//!         .collect::<Result<Vec<_>, _>>()?;
//!     downloader.download_and_cache(&keys).await?;
//!     if let Some(color) = downloader.color_for(&keys[0]).await {
//!         println!("backdrop {}", color.to_hex());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod codec;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod disk;
pub mod downloader;
pub mod error;
pub mod key;
pub mod stats;
pub mod transport;

pub use codec::{Image, ImageCodec, RasterCodec};
pub use color::ColorValue;
pub use config::{CacheConfig, ConfigLoad, ConfigLoadError, ConfigLoader};
pub use coordinator::{EntryKind, FetchCoordinator};
pub use disk::DiskStore;
pub use downloader::{ImageDownloader, ImageDownloaderBuilder};
pub use error::{FetchError, Result};
pub use key::ImageKey;
pub use stats::FetchStatsSnapshot;
pub use transport::{HttpTransport, ImageTransport};
