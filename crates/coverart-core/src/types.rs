//! Core data types for the coverart pipeline.
//!
//! A [`WorkItem`] is one record awaiting optimised artwork. Each source image
//! yields exactly four [`Variant`]s (two widths × two encodings), each stored
//! under a key that depends only on the digest, width and encoding.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::{Config, PrimaryFormat};
use crate::pipeline::digest::Digest;

/// One database record pending image optimisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Opaque record identifier
    pub id: String,
    /// Original artwork URL as found on the record
    pub source_url: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
        }
    }
}

/// Target size of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidthClass {
    Large,
    Small,
}

impl fmt::Display for WidthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidthClass::Large => write!(f, "large"),
            WidthClass::Small => write!(f, "small"),
        }
    }
}

/// Final encoding of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Primary(PrimaryFormat),
    Webp,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Primary(format) => format.extension(),
            Encoding::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Encoding::Primary(format) => format.content_type(),
            Encoding::Webp => "image/webp",
        }
    }
}

/// One produced artifact of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variant {
    pub digest: Digest,
    pub width_class: WidthClass,
    /// Longest edge in pixels, also part of the storage key
    pub size: u32,
    pub encoding: Encoding,
}

impl Variant {
    /// Deterministic object key: `<namespace>/<digest>--<size>w.<ext>`.
    pub fn storage_key(&self, namespace: &str) -> String {
        let name = format!(
            "{}--{}w.{}",
            self.digest,
            self.size,
            self.encoding.extension()
        );
        let namespace = namespace.trim_matches('/');
        if namespace.is_empty() {
            name
        } else {
            format!("{namespace}/{name}")
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}--{}w.{}",
            self.digest,
            self.size,
            self.encoding.extension()
        )
    }
}

/// An encoded variant ready for upload.
#[derive(Debug, Clone)]
pub struct VariantPayload {
    pub variant: Variant,
    pub bytes: Vec<u8>,
}

/// How variants are sized, encoded and keyed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub namespace: String,
    pub large_size: u32,
    pub small_size: u32,
    pub primary: PrimaryFormat,
}

impl KeyLayout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            namespace: config.storage.namespace.clone(),
            large_size: config.transform.large_size,
            small_size: config.transform.small_size,
            primary: config.transform.primary_format,
        }
    }

    pub fn size_of(&self, width_class: WidthClass) -> u32 {
        match width_class {
            WidthClass::Large => self.large_size,
            WidthClass::Small => self.small_size,
        }
    }

    pub fn variant(&self, digest: &Digest, width_class: WidthClass, encoding: Encoding) -> Variant {
        Variant {
            digest: digest.clone(),
            width_class,
            size: self.size_of(width_class),
            encoding,
        }
    }

    /// The canonical four variants, large/small primary then large/small webp.
    pub fn variants(&self, digest: &Digest) -> [Variant; 4] {
        let primary = Encoding::Primary(self.primary);
        [
            self.variant(digest, WidthClass::Large, primary),
            self.variant(digest, WidthClass::Small, primary),
            self.variant(digest, WidthClass::Large, Encoding::Webp),
            self.variant(digest, WidthClass::Small, Encoding::Webp),
        ]
    }

    /// Variant probed by the existence check (small webp).
    pub fn probe(&self, digest: &Digest) -> Variant {
        self.variant(digest, WidthClass::Small, Encoding::Webp)
    }

    pub fn key(&self, variant: &Variant) -> String {
        variant.storage_key(&self.namespace)
    }

    /// Extension written to the record, without the dot.
    pub fn record_extension(&self) -> &'static str {
        self.primary.extension()
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-table result of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub table: String,
    pub total: usize,
    /// Transformed, uploaded and committed
    pub published: usize,
    /// Already in storage, committed without a transform
    pub already_present: usize,
    pub failed: usize,
    /// Not attempted because the run was aborted
    pub skipped: usize,
    /// Set when a connection-level error stopped the run early
    pub aborted: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn committed(&self) -> usize {
        self.published + self.already_present
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
