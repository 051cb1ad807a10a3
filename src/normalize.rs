use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;

use crate::{
    platform::{Platform, UrlMetadata},
    provider::{PickerItem, Resolved},
};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Preview,
    Direct,
    Picker,
    Error,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct MusicInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub music_info: Option<MusicInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PickerOption {
    pub id: usize,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedResult {
    pub success: bool,
    pub platform: Platform,
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub metadata: ResultMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PickerOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub source_url: String,
    pub platform: Platform,
    pub url_metadata: UrlMetadata,
    pub quality: String,
    pub format: String,
    pub preview_only: bool,
}

impl UnifiedResult {
    fn base(context: &DownloadContext, kind: ResultKind, metadata: ResultMetadata) -> Self {
        Self {
            success: kind != ResultKind::Error,
            platform: context.platform,
            kind,
            metadata,
            thumbnail: None,
            download_url: None,
            filename: None,
            options: None,
            item_count: None,
            quality: None,
            format: None,
            error: None,
        }
    }

    pub fn failure(context: &DownloadContext, message: impl Into<String>) -> Self {
        let mut result = Self::base(context, ResultKind::Error, url_only_metadata(context));
        result.error = Some(message.into());
        result
    }
}

pub fn normalize(resolved: Resolved, context: &DownloadContext) -> UnifiedResult {
    match resolved {
        Resolved::Picker { items, thumbnail } => normalize_picker(items, thumbnail, context),
        Resolved::Direct {
            url,
            filename,
            thumbnail,
        } => normalize_direct(url, filename, thumbnail, context),
    }
}

fn url_only_metadata(context: &DownloadContext) -> ResultMetadata {
    ResultMetadata {
        author: context.url_metadata.author.clone(),
        video_id: context.url_metadata.video_id.clone(),
        source_url: context.source_url.clone(),
        ..ResultMetadata::default()
    }
}

fn normalize_picker(
    items: Vec<PickerItem>,
    reply_thumbnail: Option<String>,
    context: &DownloadContext,
) -> UnifiedResult {
    let first_thumbnail = items
        .first()
        .and_then(|item| item.thumbnail.clone())
        .or(reply_thumbnail);

    if context.preview_only {
        let mut metadata = url_only_metadata(context);
        metadata.title = Some(format!("{}_carousel", context.platform));

        let mut result = UnifiedResult::base(context, ResultKind::Preview, metadata);
        result.thumbnail = first_thumbnail;
        result.item_count = Some(items.len());
        return result;
    }

    let options = items
        .into_iter()
        .enumerate()
        .map(|(id, item)| PickerOption {
            id,
            url: item.url,
            thumbnail: item.thumbnail,
            kind: item.kind,
        })
        .collect();

    let mut result = UnifiedResult::base(context, ResultKind::Picker, url_only_metadata(context));
    result.thumbnail = first_thumbnail;
    result.options = Some(options);
    result
}

fn normalize_direct(
    download_url: String,
    filename: Option<String>,
    thumbnail: Option<String>,
    context: &DownloadContext,
) -> UnifiedResult {
    let platform = context.platform;
    let parsed = filename
        .as_deref()
        .map(|name| parse_filename_metadata(name, platform))
        .unwrap_or_default();

    let title = parsed
        .title
        .or_else(|| filename.as_deref().and_then(clean_filename))
        .unwrap_or_else(|| format!("{platform}_video_{}", Utc::now().timestamp_millis()));
    let author = context.url_metadata.author.clone().or(parsed.author);
    let video_id = context.url_metadata.video_id.clone();
    let thumbnail = thumbnail.or_else(|| fallback_thumbnail(platform, video_id.as_deref()));

    let metadata = ResultMetadata {
        title: Some(title.clone()),
        author,
        video_id,
        music_info: parsed.music_info,
        original_filename: filename,
        source_url: context.source_url.clone(),
    };

    if context.preview_only {
        let mut result = UnifiedResult::base(context, ResultKind::Preview, metadata);
        result.thumbnail = thumbnail;
        return result;
    }

    let mut result = UnifiedResult::base(context, ResultKind::Direct, metadata);
    result.thumbnail = thumbnail;
    result.download_url = Some(download_url);
    result.filename = Some(title);
    result.quality = Some(context.quality.clone());
    result.format = Some(context.format.clone());
    result
}

/// Only YouTube has a predictable thumbnail location.
pub fn fallback_thumbnail(platform: Platform, video_id: Option<&str>) -> Option<String> {
    match (platform, video_id) {
        (Platform::Youtube, Some(id)) if !id.is_empty() => {
            Some(format!("https://img.youtube.com/vi/{id}/maxresdefault.jpg"))
        }
        _ => None,
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("filename regex literal must compile")
}

static EXTENSION: LazyLock<Regex> = LazyLock::new(|| compile(r"\.[^/.]+$"));
static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| compile(r"[_-]+"));
static YOUTUBE_PREFIX: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)youtube[_-]"));
static BRACKETED_TITLE: LazyLock<Regex> = LazyLock::new(|| compile(r"^(.+?)\s*\[([^\]]+)\]$"));
static ORIGINAL_SOUND: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)original\s+sound\s*[-–]\s*(.+)"));

// First match wins. Two-group patterns are "title - author".
static MUSIC_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        compile(r"♪\s*(.+?)\s*[-–]\s*(.+)"),
        compile(r"🎵\s*(.+?)\s*[-–]\s*(.+)"),
        compile(r"(?i)\b(?:song|track|music)[:\s]+(.+?)\s*[-–]\s*(.+)"),
        compile(r"(?i)\b(?:by|feat\.?|ft\.?)\s+(.+)"),
    ]
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub music_info: Option<MusicInfo>,
}

pub fn strip_extension(filename: &str) -> String {
    EXTENSION.replace(filename, "").into_owned()
}

/// Extension stripped and `_`/`-` runs collapsed to spaces.
pub fn clean_filename(filename: &str) -> Option<String> {
    let stem = strip_extension(filename);
    non_blank(SEPARATOR_RUNS.replace_all(&stem, " ").trim())
}

pub fn parse_filename_metadata(filename: &str, platform: Platform) -> FilenameMetadata {
    let mut result = FilenameMetadata::default();
    let stem = strip_extension(filename);
    if stem.trim().is_empty() {
        return result;
    }

    match platform {
        Platform::Tiktok => {
            let parts: Vec<&str> = stem.split('_').collect();
            result.author = handle_segment(&parts).map(|author| format!("@{author}"));
            if parts.len() > 2 {
                result.title = non_blank(&parts[2..].join(" "));
            }
            if let Some(captures) = ORIGINAL_SOUND.captures(&stem) {
                result.music_info = Some(MusicInfo {
                    title: None,
                    author: non_blank(&captures[1]),
                });
            }
        }
        Platform::Instagram => {
            let parts: Vec<&str> = stem.split('_').collect();
            result.author = handle_segment(&parts).map(|author| format!("@{author}"));
        }
        Platform::Facebook => {
            let parts: Vec<&str> = stem.split('_').collect();
            result.author = handle_segment(&parts).map(ToString::to_string);
        }
        Platform::Youtube => {
            result.title = match BRACKETED_TITLE.captures(&stem) {
                Some(captures) => non_blank(&captures[1]),
                None => {
                    let unprefixed = YOUTUBE_PREFIX.replace(&stem, "");
                    non_blank(&SEPARATOR_RUNS.replace_all(&unprefixed, " "))
                }
            };
        }
    }

    if let Some(music_info) = detect_music_info(&stem) {
        result.music_info = Some(music_info);
    }

    result
}

pub fn detect_music_info(text: &str) -> Option<MusicInfo> {
    let captures = MUSIC_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))?;

    let first = captures.get(1).and_then(|value| non_blank(value.as_str()));
    match captures.get(2).and_then(|value| non_blank(value.as_str())) {
        Some(author) => Some(MusicInfo {
            title: first,
            author: Some(author),
        }),
        None => Some(MusicInfo {
            title: None,
            author: first,
        }),
    }
}

// Filenames follow `platform_author_id...`.
fn handle_segment<'a>(parts: &[&'a str]) -> Option<&'a str> {
    if parts.len() < 2 {
        return None;
    }
    let segment = parts[1].trim();
    if segment.is_empty() { None } else { Some(segment) }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(platform: Platform, preview_only: bool) -> DownloadContext {
        DownloadContext {
            source_url: "https://example.test/source".to_string(),
            platform,
            url_metadata: UrlMetadata::default(),
            quality: "1080".to_string(),
            format: "mp4".to_string(),
            preview_only,
        }
    }

    fn picker_items(count: usize) -> Vec<PickerItem> {
        (0..count)
            .map(|index| PickerItem {
                url: format!("https://cdn.example/{index}.jpg"),
                thumbnail: Some(format!("https://cdn.example/{index}-thumb.jpg")),
                kind: "photo".to_string(),
            })
            .collect()
    }

    #[test]
    fn parses_tiktok_filename() {
        let parsed = parse_filename_metadata(
            "tiktok_someuser_original sound - DJArtist.mp4",
            Platform::Tiktok,
        );
        assert_eq!(parsed.author.as_deref(), Some("@someuser"));
        assert_eq!(parsed.title.as_deref(), Some("original sound - DJArtist"));
        assert_eq!(
            parsed.music_info,
            Some(MusicInfo {
                title: None,
                author: Some("DJArtist".to_string()),
            })
        );
    }

    #[test]
    fn parses_instagram_and_facebook_owner() {
        let instagram = parse_filename_metadata("instagram_some.one_C1x2.mp4", Platform::Instagram);
        assert_eq!(instagram.author.as_deref(), Some("@some.one"));
        assert_eq!(instagram.title, None);

        let facebook = parse_filename_metadata("facebook_SomePage_123.mp4", Platform::Facebook);
        assert_eq!(facebook.author.as_deref(), Some("SomePage"));
    }

    #[test]
    fn parses_youtube_titles() {
        let bracketed = parse_filename_metadata(
            "Never Gonna Give You Up [dQw4w9WgXcQ].mp4",
            Platform::Youtube,
        );
        assert_eq!(bracketed.title.as_deref(), Some("Never Gonna Give You Up"));

        let joined = parse_filename_metadata("youtube_my-great__video_abc.mp4", Platform::Youtube);
        assert_eq!(joined.title.as_deref(), Some("my great video abc"));
    }

    #[test]
    fn music_patterns_in_order() {
        assert_eq!(
            detect_music_info("clip ♪ Blue Monday - New Order"),
            Some(MusicInfo {
                title: Some("Blue Monday".to_string()),
                author: Some("New Order".to_string()),
            })
        );
        assert_eq!(
            detect_music_info("🎵 Song A – Artist B"),
            Some(MusicInfo {
                title: Some("Song A".to_string()),
                author: Some("Artist B".to_string()),
            })
        );
        assert_eq!(
            detect_music_info("Track: Intro - Someone"),
            Some(MusicInfo {
                title: Some("Intro".to_string()),
                author: Some("Someone".to_string()),
            })
        );
        assert_eq!(
            detect_music_info("dance cover feat. Somebody"),
            Some(MusicInfo {
                title: None,
                author: Some("Somebody".to_string()),
            })
        );
        assert_eq!(detect_music_info("lobby soft rock"), None);
        assert_eq!(detect_music_info(""), None);
    }

    #[test]
    fn heuristics_tolerate_odd_filenames() {
        for name in ["", ".mp4", "_", "__.mp4", "no-separators", "[]", "♪", "tiktok_"] {
            for platform in [
                Platform::Tiktok,
                Platform::Instagram,
                Platform::Facebook,
                Platform::Youtube,
            ] {
                let _ = parse_filename_metadata(name, platform);
            }
        }
        assert_eq!(parse_filename_metadata("tiktok_", Platform::Tiktok).author, None);
        assert_eq!(clean_filename(".mp4"), None);
        assert_eq!(clean_filename("a_b--c.mp4").as_deref(), Some("a b c"));
    }

    #[test]
    fn youtube_thumbnail_is_synthesized_only_for_youtube() {
        assert_eq!(
            fallback_thumbnail(Platform::Youtube, Some("dQw4w9WgXcQ")).as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg")
        );
        assert_eq!(fallback_thumbnail(Platform::Youtube, None), None);
        assert_eq!(fallback_thumbnail(Platform::Tiktok, Some("7123")), None);
    }

    #[test]
    fn picker_keeps_every_item_in_order() {
        let result = normalize(
            Resolved::Picker {
                items: picker_items(3),
                thumbnail: None,
            },
            &context(Platform::Instagram, false),
        );

        assert_eq!(result.kind, ResultKind::Picker);
        let options = result.options.unwrap();
        assert_eq!(options.len(), 3);
        for (index, option) in options.iter().enumerate() {
            assert_eq!(option.id, index);
            assert_eq!(option.url, format!("https://cdn.example/{index}.jpg"));
        }
        assert_eq!(result.thumbnail.as_deref(), Some("https://cdn.example/0-thumb.jpg"));
    }

    #[test]
    fn picker_preview_has_count_but_no_options() {
        let result = normalize(
            Resolved::Picker {
                items: picker_items(4),
                thumbnail: None,
            },
            &context(Platform::Instagram, true),
        );

        assert_eq!(result.kind, ResultKind::Preview);
        assert_eq!(result.options, None);
        assert_eq!(result.item_count, Some(4));
        assert_eq!(result.metadata.title.as_deref(), Some("instagram_carousel"));

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("options").is_none());
        assert_eq!(json["itemCount"], 4);
    }

    #[test]
    fn direct_prefers_url_author_and_synthesizes_youtube_thumbnail() {
        let mut ctx = context(Platform::Youtube, false);
        ctx.url_metadata = UrlMetadata {
            author: Some("@channel".to_string()),
            video_id: Some("dQw4w9WgXcQ".to_string()),
        };

        let result = normalize(
            Resolved::Direct {
                url: "https://cdn.example/v.mp4".to_string(),
                filename: Some("Some Title [dQw4w9WgXcQ].mp4".to_string()),
                thumbnail: None,
            },
            &ctx,
        );

        assert_eq!(result.kind, ResultKind::Direct);
        assert_eq!(result.download_url.as_deref(), Some("https://cdn.example/v.mp4"));
        assert_eq!(result.metadata.title.as_deref(), Some("Some Title"));
        assert_eq!(result.filename.as_deref(), Some("Some Title"));
        assert_eq!(result.metadata.author.as_deref(), Some("@channel"));
        assert_eq!(
            result.thumbnail.as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg")
        );
        assert_eq!(
            result.metadata.original_filename.as_deref(),
            Some("Some Title [dQw4w9WgXcQ].mp4")
        );
    }

    #[test]
    fn direct_without_filename_gets_generated_title() {
        let result = normalize(
            Resolved::Direct {
                url: "https://cdn.example/v.mp4".to_string(),
                filename: None,
                thumbnail: Some("https://cdn.example/t.jpg".to_string()),
            },
            &context(Platform::Facebook, false),
        );

        let title = result.metadata.title.unwrap();
        assert!(title.starts_with("facebook_video_"), "title: {title}");
        assert_eq!(result.thumbnail.as_deref(), Some("https://cdn.example/t.jpg"));
        assert_eq!(result.metadata.music_info, None);
    }

    #[test]
    fn direct_preview_omits_download_url() {
        let result = normalize(
            Resolved::Direct {
                url: "https://cdn.example/v.mp4".to_string(),
                filename: Some("tiktok_user_clip.mp4".to_string()),
                thumbnail: None,
            },
            &context(Platform::Tiktok, true),
        );

        assert_eq!(result.kind, ResultKind::Preview);
        assert_eq!(result.download_url, None);
        assert_eq!(result.metadata.author.as_deref(), Some("@user"));
        assert_eq!(result.thumbnail, None);
    }

    #[test]
    fn failure_result_is_unsuccessful() {
        let result = UnifiedResult::failure(&context(Platform::Tiktok, false), "try again");
        assert!(!result.success);
        assert_eq!(result.kind, ResultKind::Error);
        assert_eq!(result.error.as_deref(), Some("try again"));
    }
}
