//! hls2mp3 library crate.
//!
//! Converts HLS playlists into downloadable MP3 files. The binary wires the
//! pieces below into an HTTP service; they are exposed for integration tests.

pub mod api;
pub mod config;
pub mod conversion;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod transcode;
pub mod utils;

pub use error::{Error, Result};
