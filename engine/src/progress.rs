/// Parsing of downloader stdout progress lines.
///
/// yt-dlp with `--newline` emits one `[download]` line per progress
/// tick, e.g. `[download]  42.5% of ~10.00MiB at 1.23MiB/s ETA 00:05`.
use muse_shared::models::Progress;
use once_cell::sync::Lazy;
use regex::Regex;

static DOWNLOAD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<percent>\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*\S+)?(?:\s+at\s+(?P<speed>\S+))?(?:\s+ETA\s+(?P<eta>\S+))?",
    )
    .expect("progress regex")
});

/// Parse one stdout line. Non-progress lines yield `None`.
pub fn parse_line(line: &str) -> Option<Progress> {
    let caps = DOWNLOAD_LINE.captures(line.trim())?;
    let percent = caps
        .name("percent")
        .and_then(|m| m.as_str().parse::<f64>().ok())?;
    Some(Progress {
        percent: Some(percent),
        speed: caps.name("speed").map(|m| m.as_str().to_string()),
        eta: caps.name("eta").map(|m| m.as_str().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_progress_line() {
        let p = parse_line("[download]  42.5% of ~10.00MiB at 1.23MiB/s ETA 00:05").unwrap();
        assert_eq!(p.percent, Some(42.5));
        assert_eq!(p.speed.as_deref(), Some("1.23MiB/s"));
        assert_eq!(p.eta.as_deref(), Some("00:05"));
    }

    #[test]
    fn test_percent_only() {
        let p = parse_line("[download] 100% of 4.56MiB").unwrap();
        assert_eq!(p.percent, Some(100.0));
        assert_eq!(p.speed, None);
    }

    #[test]
    fn test_non_progress_lines_ignored() {
        assert!(parse_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_line("[download] Destination: /tmp/a.mp4").is_none());
        assert!(parse_line("").is_none());
    }
}
