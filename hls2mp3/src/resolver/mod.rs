//! Source resolution.
//!
//! Turns a submitted playlist URL into the concrete stream URL handed to the
//! transcoder. Resolution either finds a better stream, keeps the submitted
//! URL because nothing better exists, or fails; it never falls back to the
//! submitted URL after a fetch or parse error.

mod hls;
pub mod select;

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::Result;

pub use hls::HlsSourceResolver;
pub use select::select_rendition;

/// How the resolved URL was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// An `EXT-X-MEDIA` audio rendition of a master playlist.
    AudioRendition,
    /// A master playlist variant carrying only audio codecs.
    AudioVariant,
    /// The first listed variant of a master playlist.
    FirstVariant,
    /// The submitted URL already is a media playlist.
    MediaPlaylist,
    /// The submitted URL is used unchanged because nothing better was listed.
    Direct,
    /// Resolution is disabled.
    Passthrough,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioRendition => "audio_rendition",
            Self::AudioVariant => "audio_variant",
            Self::FirstVariant => "first_variant",
            Self::MediaPlaylist => "media_playlist",
            Self::Direct => "direct",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream URL chosen for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: Url,
    pub selection: Selection,
}

impl ResolvedSource {
    pub fn new(url: Url, selection: Selection) -> Self {
        Self { url, selection }
    }
}

#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Pick the stream to transcode for `url`.
    ///
    /// Fails with [`crate::Error::Fetch`] when the manifest cannot be
    /// retrieved and [`crate::Error::Resolution`] when it cannot be parsed.
    async fn resolve(&self, url: &Url) -> Result<ResolvedSource>;
}

/// Resolver that hands the submitted URL straight to the transcoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl SourceResolver for PassthroughResolver {
    async fn resolve(&self, url: &Url) -> Result<ResolvedSource> {
        Ok(ResolvedSource::new(url.clone(), Selection::Passthrough))
    }
}
