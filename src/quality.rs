const BEST_SELECTOR: &str = "bestvideo+bestaudio/best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Best,
    P1080,
    P720,
    P480,
    P360,
}

impl Quality {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "best" => Some(Self::Best),
            "1080p" => Some(Self::P1080),
            "720p" => Some(Self::P720),
            "480p" => Some(Self::P480),
            "360p" => Some(Self::P360),
            _ => None,
        }
    }

    /// Missing values mean "best"; unknown ones also fall back to "best".
    pub fn from_request(value: Option<&str>) -> Self {
        match value {
            None => Self::Best,
            Some(raw) => Self::parse(raw).unwrap_or_else(|| {
                tracing::warn!(quality = raw, "unrecognized quality, using best");
                Self::Best
            }),
        }
    }

    fn max_height(self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P1080 => Some(1080),
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }

    pub fn format_selector(self) -> String {
        match self.max_height() {
            Some(height) => format!("bestvideo[height<={height}]+bestaudio/best"),
            None => BEST_SELECTOR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_cap_video_height() {
        assert_eq!(Quality::Best.format_selector(), "bestvideo+bestaudio/best");
        assert_eq!(
            Quality::P1080.format_selector(),
            "bestvideo[height<=1080]+bestaudio/best"
        );
        assert_eq!(
            Quality::P720.format_selector(),
            "bestvideo[height<=720]+bestaudio/best"
        );
        assert_eq!(
            Quality::P480.format_selector(),
            "bestvideo[height<=480]+bestaudio/best"
        );
        assert_eq!(
            Quality::P360.format_selector(),
            "bestvideo[height<=360]+bestaudio/best"
        );
    }

    #[test]
    fn missing_or_unknown_quality_falls_back_to_best() {
        assert_eq!(Quality::from_request(None), Quality::Best);
        assert_eq!(Quality::from_request(Some("4k")), Quality::Best);
        assert_eq!(Quality::from_request(Some("720P")), Quality::Best);
        assert_eq!(Quality::from_request(Some("480p")), Quality::P480);
    }
}
