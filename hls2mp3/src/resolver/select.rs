//! Rendition selection for master playlists.

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, VariantStream};
use url::Url;

use super::{ResolvedSource, Selection};
use crate::{Error, Result};

/// Codec prefixes of audio-only formats found in `CODECS` attributes.
const AUDIO_CODEC_PREFIXES: &[&str] = &[
    "mp4a", "ac-3", "ec-3", "ac-4", "mp3", "opus", "flac", "alac", "vorbis", "dtsc", "dtse",
];

/// Pick the best stream listed in `master`.
///
/// Precedence:
/// 1. an `EXT-X-MEDIA` audio rendition with a URI, preferring `DEFAULT=YES`
/// 2. a variant whose codecs are all audio codecs and which has no resolution
/// 3. the first listed (non I-frame) variant
///
/// Relative URIs are resolved against `base`, the URL the manifest was
/// fetched from. Returns `None` when the playlist lists nothing usable.
pub fn select_rendition(master: &MasterPlaylist, base: &Url) -> Result<Option<ResolvedSource>> {
    let audio_renditions: Vec<(&str, bool)> = master
        .alternatives
        .iter()
        .filter(|media| matches!(media.media_type, AlternativeMediaType::Audio))
        .filter_map(|media| media.uri.as_deref().map(|uri| (uri, media.default)))
        .collect();

    if let Some((uri, _)) = audio_renditions
        .iter()
        .find(|(_, default)| *default)
        .or_else(|| audio_renditions.first())
    {
        return join(base, uri).map(|url| Some(ResolvedSource::new(url, Selection::AudioRendition)));
    }

    let mut variants = master.variants.iter().filter(|v| !v.is_i_frame);

    if let Some(variant) = variants.clone().find(|v| is_audio_only(v)) {
        return join(base, &variant.uri)
            .map(|url| Some(ResolvedSource::new(url, Selection::AudioVariant)));
    }

    match variants.next() {
        Some(variant) => join(base, &variant.uri)
            .map(|url| Some(ResolvedSource::new(url, Selection::FirstVariant))),
        None => Ok(None),
    }
}

fn is_audio_only(variant: &VariantStream) -> bool {
    if variant.resolution.is_some() || variant.video.is_some() {
        return false;
    }
    let Some(codecs) = variant.codecs.as_deref() else {
        return false;
    };

    let mut codecs = codecs
        .split(',')
        .map(|codec| codec.trim().to_ascii_lowercase())
        .filter(|codec| !codec.is_empty())
        .peekable();

    codecs.peek().is_some()
        && codecs.all(|codec| {
            AUDIO_CODEC_PREFIXES
                .iter()
                .any(|prefix| codec.starts_with(prefix))
        })
}

fn join(base: &Url, uri: &str) -> Result<Url> {
    base.join(uri.trim()).map_err(|e| {
        Error::Resolution(format!(
            "cannot resolve rendition URI '{}' against {}: {}",
            uri, base, e
        ))
    })
}
