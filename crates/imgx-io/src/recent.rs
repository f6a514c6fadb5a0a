//! Recent-images cache: the last few inputs, with thumbnails.
//!
//! Records hold the full image as a data URL plus an optional JPEG
//! thumbnail. The cache keeps at most [`MAX_RECENTS`] records and evicts
//! the oldest by creation time. It lives either in memory or in a JSON
//! file that is rewritten after every change.

use std::hash::Hasher as _;
use std::path::{Path, PathBuf};

use imgx_pipeline::{Codec, SourceImage};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use tracing::{debug, warn};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::acquire::{AcquireError, AcquireLimits};
use crate::interchange::{decode_data_url, encode_data_url};

/// Most records kept at once.
pub const MAX_RECENTS: usize = 10;

/// Errors from the recent-images cache.
///
/// None of these affect the edit session; callers log and move on.
#[derive(Debug, thiserror::Error)]
pub enum RecentError {
    /// Reading or writing the cache file failed.
    #[error("recent-images cache {path}: {source}")]
    Io {
        /// Cache file path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The cache file is not valid JSON for this schema.
    #[error("recent-images cache is corrupt: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored data URL no longer decodes.
    #[error("recent image {id} cannot be restored: {source}")]
    Restore {
        /// Record id.
        id: String,
        /// Decode failure.
        #[source]
        source: AcquireError,
    },
}

/// One cached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentImage {
    /// Opaque unique id.
    pub id: String,
    /// Display name, usually the original file name.
    pub name: String,
    /// The full image as a data URL.
    pub data_url: String,
    /// Small JPEG preview as a data URL, when one could be made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_data_url: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    images: Vec<RecentImage>,
}

/// The recent-images store.
#[derive(Debug)]
pub struct RecentImages {
    path: Option<PathBuf>,
    images: Vec<RecentImage>,
    codec: Codec,
    sequence: u64,
}

impl RecentImages {
    /// A cache that is never persisted.
    #[must_use]
    pub fn in_memory(codec: Codec) -> Self {
        Self {
            path: None,
            images: Vec::new(),
            codec,
            sequence: 0,
        }
    }

    /// Open the cache stored at `path`. A missing file is an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`RecentError::Io`] if the file exists but cannot be read,
    /// and [`RecentError::Serde`] if its contents are not a cache.
    pub fn open(path: impl Into<PathBuf>, codec: Codec) -> Result<Self, RecentError> {
        let path = path.into();
        let images = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<CacheFile>(&bytes)?.images,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(io_error(&path, source)),
        };
        debug!(path = %path.display(), count = images.len(), "opened recent-images cache");
        Ok(Self {
            path: Some(path),
            images,
            codec,
            sequence: 0,
        })
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store `source` under `name` and return the new record.
    ///
    /// A thumbnail failure is logged and leaves the record without one.
    ///
    /// # Errors
    ///
    /// Returns [`RecentError::Io`] or [`RecentError::Serde`] if the cache
    /// file cannot be rewritten.
    pub fn add(&mut self, source: &SourceImage, name: &str) -> Result<RecentImage, RecentError> {
        let thumbnail_data_url = match self.codec.thumbnail(source) {
            Ok(thumb) => Some(encode_data_url(&thumb)),
            Err(e) => {
                warn!(error = %e, name, "could not render thumbnail");
                None
            }
        };

        let created_at = self.next_timestamp();
        self.sequence += 1;
        let record = RecentImage {
            id: make_id(source.bytes(), created_at, self.sequence),
            name: if name.is_empty() { "image" } else { name }.to_string(),
            data_url: encode_data_url(source),
            thumbnail_data_url,
            created_at,
        };
        self.insert(record.clone())?;
        Ok(record)
    }

    /// Insert a prepared record, evicting the oldest beyond
    /// [`MAX_RECENTS`]. A record with an existing id replaces it.
    ///
    /// # Errors
    ///
    /// As for [`Self::add`].
    pub fn insert(&mut self, record: RecentImage) -> Result<(), RecentError> {
        self.images.retain(|r| r.id != record.id);
        self.images.push(record);
        self.sort_newest_first();
        if self.images.len() > MAX_RECENTS {
            for evicted in self.images.drain(MAX_RECENTS..) {
                debug!(id = %evicted.id, name = %evicted.name, "evicted recent image");
            }
        }
        self.save()
    }

    /// Records, newest first.
    #[must_use]
    pub fn list(&self) -> &[RecentImage] {
        &self.images
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RecentImage> {
        self.images.iter().find(|r| r.id == id)
    }

    /// Remove every record.
    ///
    /// # Errors
    ///
    /// As for [`Self::add`].
    pub fn clear(&mut self) -> Result<(), RecentError> {
        self.images.clear();
        self.save()
    }

    /// Decode a record back into a [`SourceImage`].
    ///
    /// # Errors
    ///
    /// Returns [`RecentError::Restore`] if the data URL does not decode.
    pub fn to_source(
        record: &RecentImage,
        limits: &AcquireLimits,
    ) -> Result<SourceImage, RecentError> {
        decode_data_url(&record.data_url, limits).map_err(|source| RecentError::Restore {
            id: record.id.clone(),
            source,
        })
    }

    /// Milliseconds since the epoch, bumped past the newest record so
    /// creation times stay strictly ordered.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let newest = self.images.iter().map(|r| r.created_at).max();
        newest.map_or(now, |newest| now.max(newest.saturating_add(1)))
    }

    fn sort_newest_first(&mut self) {
        self.images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn save(&self) -> Result<(), RecentError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = CacheFile {
            images: self.images.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        std::fs::write(path, json).map_err(|source| io_error(path, source))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RecentError {
    RecentError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// 16 hex digits from the image bytes, creation time and a per-cache
/// sequence number.
fn make_id(bytes: &[u8], created_at: u64, sequence: u64) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write(bytes);
    hasher.write_u64(created_at);
    hasher.write_u64(sequence);
    format!("{:016x}", hasher.finish())
}
