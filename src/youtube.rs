#![forbid(unsafe_code)]

//! Everything that knows about YouTube: turning a pasted link into a video id
//! and pulling video/channel metadata from the Data API v3.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::models::VideoPreview;
use crate::upstream::{
    UpstreamError, UpstreamResult, build_agent, nested_error_message, read_json,
};

pub const SHORT_LINK_HOST: &str = "youtu.be";
pub const MAIN_DOMAIN: &str = "youtube.com";
pub const DEFAULT_DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const WATCH_PATH: &str = "/watch";
const PLAYER_MARKERS: [&str; 2] = ["shorts", "embed"];

/// Extracts the video id from a YouTube link.
///
/// Supported shapes, checked in this order (the first branch that matches the
/// host commits, there is no fallback to a later one):
///
/// * `https://youtu.be/<id>`: first non-empty path segment.
/// * `https://*youtube.com/watch?v=<id>`: the first `v` query parameter. A
///   missing and an empty `v` are treated the same.
/// * `https://*youtube.com/.../shorts/<id>` or `.../embed/<id>`: the segment
///   after the first marker.
///
/// Anything else, including strings that do not parse as a URL, yields `None`.
/// The host test for the main domain is a plain substring check.
pub fn extract_video_id(candidate: &str) -> Option<String> {
    let url = Url::parse(candidate).ok()?;
    let host = url.host_str()?;

    if host == SHORT_LINK_HOST {
        return path_segments(&url).next().map(str::to_string);
    }

    if host.contains(MAIN_DOMAIN) {
        if url.path().starts_with(WATCH_PATH) {
            return url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned())
                .filter(|id| !id.is_empty());
        }

        let segments: Vec<&str> = path_segments(&url).collect();
        return segments
            .iter()
            .position(|segment| PLAYER_MARKERS.contains(segment))
            .and_then(|marker| segments.get(marker + 1))
            .map(|id| id.to_string());
    }

    None
}

fn path_segments(url: &Url) -> impl Iterator<Item = &str> {
    url.path().split('/').filter(|segment| !segment.is_empty())
}

/// Source of video metadata. The server only talks to this trait so handler
/// tests can swap in a canned catalog.
pub trait VideoCatalog: Send + Sync {
    /// Title, channel, thumbnails and view count for `video_id`.
    /// `youtube_url` is echoed back untouched in the preview.
    fn fetch_preview(&self, video_id: &str, youtube_url: &str) -> UpstreamResult<VideoPreview>;

    /// Current public view count for `video_id`.
    fn fetch_view_count(&self, video_id: &str) -> UpstreamResult<i64>;
}

/// Blocking YouTube Data API v3 client.
pub struct YouTubeApi {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl YouTubeApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self::with_base_url(api_key, DEFAULT_DATA_API_BASE, timeout)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: build_agent(timeout),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn fetch_video(&self, video_id: &str, part: &str) -> UpstreamResult<VideoItem> {
        let result = self
            .agent
            .get(&format!("{}/videos", self.base_url))
            .query("part", part)
            .query("id", video_id)
            .query("key", &self.api_key)
            .call();
        let list: ListResponse<VideoItem> =
            read_json(result, nested_error_message, "YouTube API error")?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::not_found("Video not found"))
    }

    /// Best-effort channel avatar lookup; failures only cost the avatar.
    fn channel_avatar(&self, channel_id: &str) -> String {
        if channel_id.is_empty() {
            return String::new();
        }
        let result = self
            .agent
            .get(&format!("{}/channels", self.base_url))
            .query("part", "snippet")
            .query("id", channel_id)
            .query("key", &self.api_key)
            .call();
        match read_json::<ListResponse<ChannelItem>>(result, nested_error_message, "") {
            Ok(list) => list
                .items
                .first()
                .map(|channel| channel.snippet.thumbnails.best_avatar_url())
                .unwrap_or_default(),
            Err(err) => {
                tracing::debug!(channel_id, error = %err, "channel avatar lookup failed");
                String::new()
            }
        }
    }
}

impl VideoCatalog for YouTubeApi {
    fn fetch_preview(&self, video_id: &str, youtube_url: &str) -> UpstreamResult<VideoPreview> {
        let item = self.fetch_video(video_id, "snippet,statistics")?;
        let avatar = self.channel_avatar(&item.snippet.channel_id);
        Ok(build_preview(item, avatar, video_id, youtube_url))
    }

    fn fetch_view_count(&self, video_id: &str) -> UpstreamResult<i64> {
        let item = self.fetch_video(video_id, "statistics")?;
        Ok(item.statistics.views())
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoItem {
    #[serde(default)]
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

impl Statistics {
    fn views(&self) -> i64 {
        self.view_count
            .as_deref()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    snippet: ChannelSnippet,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    maxres: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    #[serde(rename = "default")]
    smallest: Option<Thumbnail>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnail {
    #[serde(default)]
    url: String,
}

impl Thumbnails {
    // The first size present wins even if its url is blank.
    fn pick(candidates: &[&Option<Thumbnail>]) -> String {
        candidates
            .iter()
            .find_map(|candidate| candidate.as_ref())
            .map(|thumb| thumb.url.clone())
            .unwrap_or_default()
    }

    fn best_video_url(&self) -> String {
        Self::pick(&[
            &self.maxres,
            &self.standard,
            &self.high,
            &self.medium,
            &self.smallest,
        ])
    }

    fn best_avatar_url(&self) -> String {
        Self::pick(&[&self.high, &self.medium, &self.smallest])
    }
}

fn build_preview(
    item: VideoItem,
    channel_avatar_url: String,
    video_id: &str,
    youtube_url: &str,
) -> VideoPreview {
    let thumbnail_url = item.snippet.thumbnails.best_video_url();
    VideoPreview {
        video_id: video_id.to_string(),
        video_title: item.snippet.title,
        channel_id: item.snippet.channel_id,
        channel_title: item.snippet.channel_title,
        channel_avatar_url,
        thumbnail_url,
        view_count: item.statistics.views(),
        youtube_url: youtube_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_strings_that_are_not_urls() {
        for input in ["", "not a url", "youtube.com/watch?v=abc", "://youtu.be/x", "abc123"] {
            assert_eq!(extract_video_id(input), None, "input: {input:?}");
        }
    }

    #[test]
    fn short_links_use_first_segment() {
        assert_eq!(
            extract_video_id("https://youtu.be/abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_video_id("https://youtu.be//abc123/extra?t=10").as_deref(),
            Some("abc123")
        );
        assert_eq!(extract_video_id("https://youtu.be/"), None);
        assert_eq!(extract_video_id("https://youtu.be"), None);
    }

    #[test]
    fn watch_links_read_v_parameter() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://m.youtube.com/watch?t=30&v=abc&v=def").as_deref(),
            Some("abc")
        );
        assert_eq!(extract_video_id("https://www.youtube.com/watch?foo=bar"), None);
    }

    #[test]
    fn empty_v_reads_as_missing() {
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v="), None);
    }

    #[test]
    fn watch_branch_commits_without_fallback() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch/shorts/XyZ789"),
            None
        );
    }

    #[test]
    fn shorts_and_embed_links() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/shorts/XyZ789").as_deref(),
            Some("XyZ789")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_video_id("https://www.youtube-nocookie.com/embed/abc"),
            None
        );
        assert_eq!(extract_video_id("https://www.youtube.com/shorts/"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/@channel"), None);
    }

    #[test]
    fn foreign_hosts_are_rejected() {
        assert_eq!(extract_video_id("https://example.com/video/1"), None);
        assert_eq!(extract_video_id("https://vimeo.com/embed/abc"), None);
    }

    #[test]
    fn host_match_is_loose_substring() {
        assert_eq!(
            extract_video_id("https://music.youtube.com.example/embed/abc").as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_video_id("https://YOUTU.BE/abc").as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let url = "https://www.youtube.com/shorts/XyZ789?feature=share";
        assert_eq!(extract_video_id(url), extract_video_id(url));
    }

    #[test]
    fn preview_prefers_largest_thumbnail_and_parses_views() {
        let item: VideoItem = serde_json::from_value(json!({
            "snippet": {
                "title": "Edit reel",
                "channelId": "UC123",
                "channelTitle": "Cutter",
                "thumbnails": {
                    "default": {"url": "https://i.ytimg.com/d.jpg"},
                    "high": {"url": "https://i.ytimg.com/h.jpg"},
                    "standard": {"url": "https://i.ytimg.com/s.jpg"}
                }
            },
            "statistics": {"viewCount": "12345"}
        }))
        .unwrap();
        let preview = build_preview(
            item,
            "https://yt3.ggpht.com/a.jpg".into(),
            "abc",
            "https://youtu.be/abc",
        );
        assert_eq!(preview.thumbnail_url, "https://i.ytimg.com/s.jpg");
        assert_eq!(preview.view_count, 12345);
        assert_eq!(preview.channel_id, "UC123");
        assert_eq!(preview.youtube_url, "https://youtu.be/abc");
    }

    #[test]
    fn preview_tolerates_missing_snippet() {
        let item: VideoItem = serde_json::from_value(json!({"id": "abc"})).unwrap();
        let preview = build_preview(item, String::new(), "abc", "https://youtu.be/abc");
        assert_eq!(preview.video_title, "");
        assert_eq!(preview.thumbnail_url, "");
        assert_eq!(preview.view_count, 0);
    }

    #[test]
    fn avatar_prefers_high_then_medium() {
        let thumbs: Thumbnails = serde_json::from_value(json!({
            "default": {"url": "d"},
            "medium": {"url": "m"}
        }))
        .unwrap();
        assert_eq!(thumbs.best_avatar_url(), "m");
        assert_eq!(Thumbnails::default().best_avatar_url(), "");
    }
}
