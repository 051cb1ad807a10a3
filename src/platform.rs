use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Tiktok,
    Instagram,
    Facebook,
    Youtube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Youtube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("platform regex literal must compile")
}

// Checked in this order; the first platform with a matching pattern wins.
static PLATFORM_PATTERNS: LazyLock<Vec<(Platform, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            Platform::Youtube,
            vec![compile(
                r"(?i)(?:youtube\.com/(?:watch\?v=|shorts/|embed/)|youtu\.be/)",
            )],
        ),
        (
            Platform::Tiktok,
            vec![
                compile(r"(?i)tiktok\.com/@[\w.-]+/video/\d+"),
                compile(r"(?i)tiktok\.com/t/\w+"),
                compile(r"(?i)vm\.tiktok\.com/\w+"),
            ],
        ),
        (
            Platform::Instagram,
            vec![
                compile(r"(?i)instagram\.com/(?:p|reel|reels|stories)/[\w-]+"),
                compile(r"(?i)instagr\.am/p/[\w-]+"),
            ],
        ),
        (
            Platform::Facebook,
            vec![
                compile(r"(?i)facebook\.com/.*/videos/\d+"),
                compile(r"(?i)facebook\.com/watch/?\?v=\d+"),
                compile(r"(?i)fb\.watch/\w+"),
                compile(r"(?i)facebook\.com/reel/\d+"),
            ],
        ),
    ]
});

static TIKTOK_VIDEO: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)tiktok\.com/@([\w.-]+)/video/(\d+)"));
static INSTAGRAM_POST: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)instagram\.com/(?:[\w.-]+/)?(?:p|reel|reels)/([^/?#]+)"));
static INSTAGRAM_USER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)instagram\.com/([\w.-]+)/(?:p|reel|reels)/"));
static YOUTUBE_VIDEO: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)(?:youtube\.com/(?:watch\?v=|shorts/)|youtu\.be/)([^&?/#]+)")
});
static YOUTUBE_CHANNEL: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)youtube\.com/@([^/?#]+)"));
static FACEBOOK_VIDEO: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        compile(r"(?i)videos/(\d+)"),
        compile(r"(?i)v=(\d+)"),
        compile(r"(?i)reel/(\d+)"),
    ]
});
static FACEBOOK_PAGE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)facebook\.com/([^/?#]+)/videos"));

/// Classifies a URL by the first platform whose pattern matches. `None`
/// means the URL is not supported.
pub fn detect_platform(url: &str) -> Option<Platform> {
    PLATFORM_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|regex| regex.is_match(url)))
        .map(|(platform, _)| *platform)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMetadata {
    pub author: Option<String>,
    pub video_id: Option<String>,
}

pub fn extract_url_metadata(url: &str, platform: Platform) -> UrlMetadata {
    let mut metadata = UrlMetadata::default();

    match platform {
        Platform::Tiktok => {
            if let Some(captures) = TIKTOK_VIDEO.captures(url) {
                metadata.author = Some(format!("@{}", &captures[1]));
                metadata.video_id = Some(captures[2].to_string());
            }
        }
        Platform::Instagram => {
            metadata.video_id = capture_first(&INSTAGRAM_POST, url);
            metadata.author = capture_first(&INSTAGRAM_USER, url)
                .filter(|user| {
                    !matches!(user.to_ascii_lowercase().as_str(), "p" | "reel" | "reels")
                })
                .map(|user| format!("@{user}"));
        }
        Platform::Youtube => {
            metadata.video_id = capture_first(&YOUTUBE_VIDEO, url);
            metadata.author =
                capture_first(&YOUTUBE_CHANNEL, url).map(|channel| format!("@{channel}"));
        }
        Platform::Facebook => {
            metadata.video_id = FACEBOOK_VIDEO
                .iter()
                .find_map(|regex| capture_first(regex, url));
            metadata.author = capture_first(&FACEBOOK_PAGE, url);
        }
    }

    metadata
}

fn capture_first(regex: &Regex, input: &str) -> Option<String> {
    regex
        .captures(input)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .filter(|value| !value.is_empty())
}
