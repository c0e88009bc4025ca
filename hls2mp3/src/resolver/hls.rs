use std::time::Duration;

use async_trait::async_trait;
use m3u8_rs::Playlist;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use super::{ResolvedSource, Selection, SourceResolver, select_rendition};
use crate::config::ResolverConfig;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Manifests larger than this are rejected without being read.
const MAX_MANIFEST_BYTES: u64 = 4 * 1024 * 1024;

/// Resolver that fetches the submitted manifest and picks an audio stream.
pub struct HlsSourceResolver {
    client: reqwest::Client,
    timeout: Duration,
}

impl HlsSourceResolver {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self> {
        Ok(Self::new(build_client(config)?, config.timeout))
    }
}

/// Whether a response is media the transcoder can read directly.
fn is_direct_media(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    (content_type.starts_with("audio/") || content_type.starts_with("video/"))
        && !content_type.contains("mpegurl")
}

fn manifest_too_large(url: &Url) -> Error {
    Error::Resolution(format!(
        "manifest at {} exceeds {} bytes",
        url, MAX_MANIFEST_BYTES
    ))
}

/// Read the manifest body, giving up as soon as it passes the size cap.
async fn read_manifest(mut response: reqwest::Response, url: &Url) -> Result<Vec<u8>> {
    if response
        .content_length()
        .is_some_and(|len| len > MAX_MANIFEST_BYTES)
    {
        return Err(manifest_too_large(url));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::fetch(url.as_str(), e.to_string()))?
    {
        if (body.len() + chunk.len()) as u64 > MAX_MANIFEST_BYTES {
            debug!(url = %url, read = body.len(), "Manifest over size cap, aborting read");
            return Err(manifest_too_large(url));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl SourceResolver for HlsSourceResolver {
    async fn resolve(&self, url: &Url) -> Result<ResolvedSource> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::fetch(url.as_str(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::fetch(
                url.as_str(),
                format!("HTTP {}", response.status()),
            ));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            && is_direct_media(content_type)
        {
            debug!(url = %url, content_type, "Source is plain media, using it directly");
            return Ok(ResolvedSource::new(url.clone(), Selection::Direct));
        }

        // Relative URIs resolve against the final URL after redirects.
        let base = response.url().clone();
        let body = read_manifest(response, url).await?;

        match m3u8_rs::parse_playlist_res(&body) {
            Ok(Playlist::MediaPlaylist(_)) => {
                debug!(url = %url, "Source is a media playlist");
                Ok(ResolvedSource::new(url.clone(), Selection::MediaPlaylist))
            }
            Ok(Playlist::MasterPlaylist(master)) => {
                debug!(
                    url = %url,
                    variants = master.variants.len(),
                    alternatives = master.alternatives.len(),
                    "Selecting rendition from master playlist"
                );
                Ok(select_rendition(&master, &base)?
                    .unwrap_or_else(|| ResolvedSource::new(url.clone(), Selection::Direct)))
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Manifest parse failed");
                Err(Error::Resolution(
                    "manifest is not a valid M3U8 playlist".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use tokio::net::TcpListener;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"\n\
        video/720p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.2\"\n\
        audio/index.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:6\n\
        #EXTINF:6.0,\n\
        seg0.ts\n\
        #EXT-X-ENDLIST\n";

    async fn origin() -> String {
        let app = Router::new()
            .route(
                "/live/master.m3u8",
                get(|| async {
                    ([(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")], MASTER)
                }),
            )
            .route("/live/media.m3u8", get(|| async { MEDIA }))
            .route("/broken.m3u8", get(|| async { "<html>not a playlist</html>" }))
            .route(
                "/file.mp3",
                get(|| async { ([(header::CONTENT_TYPE, "audio/mpeg")], "ID3") }),
            )
            .route(
                "/old.m3u8",
                get(|| async {
                    (
                        StatusCode::FOUND,
                        [(header::LOCATION, "/live/master.m3u8")],
                    )
                        .into_response()
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn resolver() -> HlsSourceResolver {
        HlsSourceResolver::from_config(&ResolverConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolves_audio_variant() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/live/master.m3u8")).unwrap();

        let resolved = resolver().resolve(&url).await.unwrap();
        assert_eq!(resolved.selection, Selection::AudioVariant);
        assert_eq!(resolved.url.as_str(), format!("{base}/live/audio/index.m3u8"));
    }

    #[tokio::test]
    async fn test_relative_uris_follow_redirects() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/old.m3u8")).unwrap();

        let resolved = resolver().resolve(&url).await.unwrap();
        assert_eq!(resolved.url.as_str(), format!("{base}/live/audio/index.m3u8"));
    }

    #[tokio::test]
    async fn test_media_playlist_is_kept() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/live/media.m3u8")).unwrap();

        let resolved = resolver().resolve(&url).await.unwrap();
        assert_eq!(resolved.selection, Selection::MediaPlaylist);
        assert_eq!(resolved.url, url);
    }

    #[tokio::test]
    async fn test_plain_media_is_kept() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/file.mp3")).unwrap();

        let resolved = resolver().resolve(&url).await.unwrap();
        assert_eq!(resolved.selection, Selection::Direct);
        assert_eq!(resolved.url, url);
    }

    #[tokio::test]
    async fn test_unparsable_manifest_is_resolution_error() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/broken.m3u8")).unwrap();

        let err = resolver().resolve(&url).await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_error() {
        let base = origin().await;
        let url = Url::parse(&format!("{base}/missing.m3u8")).unwrap();

        let err = resolver().resolve(&url).await.unwrap_err();
        match err {
            Error::Fetch { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_fetch_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/master.m3u8")).unwrap();
        let err = resolver().resolve(&url).await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_oversized_chunked_manifest_is_rejected() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Chunked transfer carries no Content-Length, so the cap has to hold
        // while the body streams in.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;

            let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: application/vnd.apple.mpegurl\r\n\
                        Transfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let chunk = vec![b'#'; 128 * 1024];
            for _ in 0..64 {
                let frame = format!("{:x}\r\n", chunk.len());
                if socket.write_all(frame.as_bytes()).await.is_err()
                    || socket.write_all(&chunk).await.is_err()
                    || socket.write_all(b"\r\n").await.is_err()
                {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });

        let url = Url::parse(&format!("http://{addr}/huge.m3u8")).unwrap();
        let err = resolver().resolve(&url).await.unwrap_err();
        match err {
            Error::Resolution(message) => assert!(message.contains("exceeds"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_direct_media_detection() {
        assert!(is_direct_media("audio/mpeg"));
        assert!(is_direct_media("video/MP2T"));
        assert!(!is_direct_media("audio/mpegurl"));
        assert!(!is_direct_media("application/vnd.apple.mpegurl"));
        assert!(!is_direct_media("text/plain"));
    }
}
