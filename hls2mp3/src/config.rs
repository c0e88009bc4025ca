//! Service configuration loaded from the environment.
//!
//! Every section has a `Default` matching the documented defaults; values
//! present in the environment (or a `.env` file loaded by `main`) override
//! them. Malformed values are reported instead of silently ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::{Error, Result};

/// Fixed audio encoding profile handed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingProfile {
    /// Encoder name passed to `-acodec`.
    pub codec: String,
    /// Target bitrate passed to `-ab` (e.g. "128k").
    pub bitrate: String,
    /// Output channel count.
    pub channels: u8,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            codec: "libmp3lame".to_string(),
            bitrate: "128k".to_string(),
            channels: 2,
            sample_rate: 44_100,
        }
    }
}

/// Transcoder executable settings.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub binary_path: String,
    pub profile: EncodingProfile,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            profile: EncodingProfile::default(),
        }
    }
}

/// Source resolution settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Fetch and inspect manifests. When disabled the submitted URL is used as is.
    pub enabled: bool,
    /// Upper bound for a single manifest fetch.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(15),
            user_agent: concat!("hls2mp3/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Job admission and artifact retention settings.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Maximum number of transcodes running at once.
    pub max_concurrent: usize,
    /// Directory holding the produced MP3 files.
    pub output_dir: PathBuf,
    /// Lifetime of a job, measured from submission.
    pub retention_ttl: Duration,
    /// Interval between retention sweeps.
    pub sweep_interval: Duration,
    /// Evict a job as soon as its artifact has been served once.
    pub delete_after_download: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            output_dir: std::env::temp_dir().join("hls2mp3"),
            retention_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            delete_after_download: false,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ApiServerConfig,
    pub conversion: ConversionConfig,
    pub transcoder: TranscoderConfig,
    pub resolver: ResolverConfig,
    /// Directory for the rolling log file. Console-only logging when unset.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        if let Some(bind_address) = env.string("API_BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = env.parse::<u16>("PORT")?.or(env.parse::<u16>("API_PORT")?) {
            config.server.port = port;
        }
        if let Some(enable_cors) = env.flag("API_ENABLE_CORS")? {
            config.server.enable_cors = enable_cors;
        }

        let conversion = &mut config.conversion;
        if let Some(max) = env.parse::<usize>("MAX_CONCURRENT_CONVERSIONS")? {
            if max == 0 {
                return Err(Error::config(
                    "MAX_CONCURRENT_CONVERSIONS must be at least 1",
                ));
            }
            conversion.max_concurrent = max;
        }
        if let Some(dir) = env.string("OUTPUT_DIR") {
            conversion.output_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env.parse::<u64>("RETENTION_TTL_SECS")? {
            conversion.retention_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("SWEEP_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(Error::config("SWEEP_INTERVAL_SECS must be at least 1"));
            }
            conversion.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(delete) = env.flag("DELETE_AFTER_DOWNLOAD")? {
            conversion.delete_after_download = delete;
        }

        let transcoder = &mut config.transcoder;
        if let Some(path) = env.string("FFMPEG_PATH") {
            transcoder.binary_path = path;
        }
        if let Some(codec) = env.string("AUDIO_CODEC") {
            transcoder.profile.codec = codec;
        }
        if let Some(bitrate) = env.string("AUDIO_BITRATE") {
            transcoder.profile.bitrate = bitrate;
        }
        if let Some(channels) = env.parse::<u8>("AUDIO_CHANNELS")? {
            transcoder.profile.channels = channels;
        }
        if let Some(rate) = env.parse::<u32>("AUDIO_SAMPLE_RATE")? {
            transcoder.profile.sample_rate = rate;
        }

        let resolver = &mut config.resolver;
        if let Some(enabled) = env.flag("RESOLVE_STREAMS")? {
            resolver.enabled = enabled;
        }
        if let Some(secs) = env.parse::<u64>("RESOLVE_TIMEOUT_SECS")? {
            resolver.timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(ua) = env.string("HTTP_USER_AGENT") {
            resolver.user_agent = ua;
        }

        config.log_dir = env.string("LOG_DIR").map(PathBuf::from);

        Ok(config)
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::config(format!("invalid {key}={raw:?}: {e}"))),
            None => Ok(None),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.string(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(Error::config(format!(
                    "invalid {key}={raw:?}: expected a boolean"
                ))),
            },
            None => Ok(None),
        }
    }
}
