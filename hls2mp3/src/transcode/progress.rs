//! FFmpeg output parsing utilities.
//!
//! FFmpeg reports progress in two shapes, both of which are accepted:
//!
//! - classic stats lines on stderr:
//!   `size=     512kB time=00:00:32.70 bitrate= 128.3kbits/s speed=65.4x`
//! - `-progress` key/value lines: `out_time=00:00:32.704000`

/// Parse time string in HH:MM:SS.ms format to seconds.
///
/// Negative times (ffmpeg prints these before the first packet) and malformed
/// strings yield `None`.
///
/// # Examples
/// ```ignore
/// assert_eq!(parse_time("00:00:10.50"), Some(10.5));
/// assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
/// assert_eq!(parse_time("invalid"), None);
/// ```
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    (total.is_finite() && hours >= 0.0 && minutes >= 0.0 && seconds >= 0.0).then_some(total)
}

/// Parse the elapsed media time from a progress line.
///
/// Matches both `time=` and `out_time=`; `out_time_us=`/`out_time_ms=` are
/// ignored since the same instant is always also reported as `out_time=`.
pub fn parse_elapsed(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = line[time_start + 5..].trim_start();
    let end = time_str
        .find(|c: char| c.is_whitespace())
        .unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse speed multiplier from FFmpeg output (e.g., "speed=1.00x").
pub fn parse_speed(line: &str) -> Option<f64> {
    let speed_start = line.find("speed=")?;
    let speed_str = line[speed_start + 6..].trim_start();
    let end = speed_str.find('x')?;
    speed_str[..end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_valid() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("00:01:30.50"), Some(90.5));
        assert_eq!(parse_time("00:00:01.000000"), Some(1.0));
    }

    #[test]
    fn test_parse_time_invalid() {
        assert_eq!(parse_time("invalid"), None);
        assert_eq!(parse_time("00:00"), None);
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("N/A"), None);
        assert_eq!(parse_time("-577014:32:22.775808"), None);
    }

    #[test]
    fn test_parse_elapsed_stats_line() {
        let line = "size=     512kB time=00:00:32.70 bitrate= 128.3kbits/s speed=65.4x";
        assert_eq!(parse_elapsed(line), Some(32.7));
        assert_eq!(parse_speed(line), Some(65.4));
    }

    #[test]
    fn test_parse_elapsed_progress_pipe() {
        assert_eq!(parse_elapsed("out_time=00:01:00.250000"), Some(60.25));
        assert_eq!(parse_elapsed("out_time_us=60250000"), None);
        assert_eq!(parse_elapsed("out_time_ms=60250000"), None);
        assert_eq!(parse_elapsed("out_time=N/A"), None);
        assert_eq!(parse_elapsed("progress=continue"), None);
    }

    #[test]
    fn test_parse_elapsed_at_end_of_line() {
        assert_eq!(parse_elapsed("time=00:00:04.00"), Some(4.0));
    }

    #[test]
    fn test_unrelated_lines() {
        assert_eq!(parse_elapsed("Stream #0:0: Audio: aac, 44100 Hz"), None);
        assert_eq!(parse_speed("no speed here"), None);
    }
}
