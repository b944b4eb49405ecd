use std::sync::LazyLock;

use regex::Regex;

static VIDEO_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.?be)/.+$")
        .unwrap_or_else(|error| panic!("invalid video url pattern: {error}"))
});

/// Accepts only youtube.com / youtu.be style URLs. The input is matched
/// as-is: no trimming and no canonicalisation.
pub fn is_supported_video_url(input: &str) -> bool {
    !input.is_empty() && VIDEO_URL_PATTERN.is_match(input)
}
