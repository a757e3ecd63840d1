//! Records exchanged with the data store, the ratings API and the browser.
//!
//! Field names mirror the Postgres columns (`youtube_works`,
//! `youtube_view_logs`) and the ratings API JSON, so the structs serialize to
//! exactly what the frontend already consumes.

use serde::{Deserialize, Deserializer, Serialize};

/// Metadata resolved from the YouTube Data API for a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPreview {
    pub video_id: String,
    pub video_title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub channel_avatar_url: String,
    pub thumbnail_url: String,
    pub view_count: i64,
    pub youtube_url: String,
}

/// A registered portfolio video (row of `youtube_works`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: i64,
    pub youtube_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub channel_avatar_url: String,
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub view_count: i64,
}

/// Preview payload echoed back by the admin UI when saving a work.
///
/// Every field is optional because the browser may send a partial (or stale)
/// preview; `view_count` shows up both as a number and as a numeric string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkMetadata {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_title: Option<String>,
    #[serde(default)]
    pub channel_avatar_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub view_count: Option<LooseCount>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LooseCount {
    Number(f64),
    Text(String),
}

impl LooseCount {
    /// Integer value, `0` when the text is not a number.
    pub fn value(&self) -> i64 {
        match self {
            LooseCount::Number(value) if value.is_finite() => *value as i64,
            LooseCount::Number(_) => 0,
            LooseCount::Text(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(|value| value as i64)
                .unwrap_or(0),
        }
    }
}

impl From<VideoPreview> for WorkMetadata {
    fn from(preview: VideoPreview) -> Self {
        Self {
            video_id: Some(preview.video_id),
            video_title: Some(preview.video_title),
            channel_id: Some(preview.channel_id),
            channel_title: Some(preview.channel_title),
            channel_avatar_url: Some(preview.channel_avatar_url),
            thumbnail_url: Some(preview.thumbnail_url),
            view_count: Some(LooseCount::Number(preview.view_count as f64)),
        }
    }
}

/// Row written when a work is created or re-saved. Conflicts on `video_id`
/// merge into the existing row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkUpsert {
    pub youtube_url: String,
    pub note: String,
    pub video_id: Option<String>,
    pub video_title: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub channel_avatar_url: String,
    pub thumbnail_url: Option<String>,
    pub view_count: i64,
}

impl WorkUpsert {
    pub fn new(youtube_url: String, note: Option<String>, meta: WorkMetadata) -> Self {
        Self {
            youtube_url,
            note: note.unwrap_or_default(),
            video_id: meta.video_id,
            video_title: meta.video_title,
            channel_id: meta.channel_id,
            channel_title: meta.channel_title,
            channel_avatar_url: meta.channel_avatar_url.unwrap_or_default(),
            thumbnail_url: meta.thumbnail_url,
            view_count: meta.view_count.map(|count| count.value()).unwrap_or(0),
        }
    }
}

/// Columns rewritten when an existing work is refreshed from YouTube.
/// Blank text coming back from the API is stored as `NULL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkRefresh {
    pub video_id: String,
    pub video_title: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub channel_avatar_url: String,
    pub thumbnail_url: Option<String>,
    pub view_count: i64,
}

impl From<VideoPreview> for WorkRefresh {
    fn from(preview: VideoPreview) -> Self {
        Self {
            video_id: preview.video_id,
            video_title: non_empty(preview.video_title),
            channel_id: non_empty(preview.channel_id),
            channel_title: non_empty(preview.channel_title),
            channel_avatar_url: preview.channel_avatar_url,
            thumbnail_url: non_empty(preview.thumbnail_url),
            view_count: preview.view_count,
        }
    }
}

/// View-count snapshot (row of `youtube_view_logs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewLog {
    pub id: i64,
    pub work_id: Option<i64>,
    pub video_id: String,
    pub youtube_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub view_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewViewLog {
    pub work_id: Option<i64>,
    pub video_id: String,
    pub youtube_url: Option<String>,
    pub view_count: i64,
}

/// Filter for listing view logs. At least one of `work_id`/`video_id` is set
/// by the caller; both combine with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewLogQuery {
    pub work_id: Option<i64>,
    pub video_id: Option<String>,
    pub limit: usize,
}

impl ViewLogQuery {
    pub const DEFAULT_LIMIT: usize = 20;
    pub const MAX_LIMIT: usize = 200;

    /// Clamps a requested limit into `1..=MAX_LIMIT`, defaulting when absent.
    pub fn clamp_limit(requested: Option<i64>) -> usize {
        match requested {
            None => Self::DEFAULT_LIMIT,
            Some(value) => value.clamp(1, Self::MAX_LIMIT as i64) as usize,
        }
    }
}

/// Testimonial left for a YouTube channel, as served by the ratings API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRating {
    pub id: i64,
    pub youtube_handle: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub subscriber_count: i64,
    #[serde(default)]
    pub avatar_url: String,
    pub stars: i64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub submitted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSubmission {
    pub youtube_handle: String,
    pub stars: i64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSubmitted {
    pub success: bool,
    pub data: ChannelRating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingDeleted {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub id: i64,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn preview() -> VideoPreview {
        VideoPreview {
            video_id: "abc".into(),
            video_title: "".into(),
            channel_id: "UC1".into(),
            channel_title: "".into(),
            channel_avatar_url: "".into(),
            thumbnail_url: "https://i.ytimg.com/vi/abc/hq.jpg".into(),
            view_count: 42,
            youtube_url: "https://youtu.be/abc".into(),
        }
    }

    #[test]
    fn loose_count_accepts_numbers_and_strings() {
        let meta: WorkMetadata =
            serde_json::from_value(json!({"view_count": "1234"})).unwrap();
        assert_eq!(meta.view_count.unwrap().value(), 1234);

        let meta: WorkMetadata = serde_json::from_value(json!({"view_count": 99})).unwrap();
        assert_eq!(meta.view_count.unwrap().value(), 99);

        assert_eq!(LooseCount::Text("lots".into()).value(), 0);
        assert_eq!(LooseCount::Text("".into()).value(), 0);
    }

    #[test]
    fn upsert_fills_defaults_from_partial_metadata() {
        let upsert = WorkUpsert::new(
            "https://youtu.be/abc".into(),
            None,
            WorkMetadata {
                video_id: Some("abc".into()),
                ..WorkMetadata::default()
            },
        );
        assert_eq!(upsert.note, "");
        assert_eq!(upsert.channel_avatar_url, "");
        assert_eq!(upsert.view_count, 0);
        assert_eq!(upsert.video_title, None);
        assert_eq!(upsert.video_id.as_deref(), Some("abc"));
    }

    #[test]
    fn refresh_stores_blank_text_as_null() {
        let refresh = WorkRefresh::from(preview());
        assert_eq!(refresh.video_title, None);
        assert_eq!(refresh.channel_title, None);
        assert_eq!(refresh.channel_id.as_deref(), Some("UC1"));
        assert_eq!(refresh.channel_avatar_url, "");
        assert_eq!(refresh.view_count, 42);
    }

    #[test]
    fn work_tolerates_null_columns() {
        let work: Work = serde_json::from_value(json!({
            "id": 7,
            "youtube_url": "https://youtu.be/abc",
            "note": null,
            "created_at": "2025-01-01T00:00:00Z",
            "video_id": null,
            "video_title": null,
            "channel_id": null,
            "channel_title": null,
            "channel_avatar_url": null,
            "thumbnail_url": null,
            "view_count": null
        }))
        .unwrap();
        assert_eq!(work.note, "");
        assert_eq!(work.view_count, 0);
    }

    #[test]
    fn channel_rating_uses_camel_case() {
        let rating: ChannelRating = serde_json::from_value(json!({
            "id": 1,
            "youtubeHandle": "@editor",
            "channelName": "Editor",
            "subscriberCount": 1000,
            "avatarUrl": "https://example.test/a.png",
            "stars": 5,
            "comment": "great",
            "submittedAt": "2025-02-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(rating.youtube_handle, "@editor");
        let value = serde_json::to_value(&rating).unwrap();
        assert_eq!(value["submittedAt"], "2025-02-02T00:00:00Z");
    }

    #[test]
    fn clamp_limit_bounds() {
        assert_eq!(ViewLogQuery::clamp_limit(None), 20);
        assert_eq!(ViewLogQuery::clamp_limit(Some(0)), 1);
        assert_eq!(ViewLogQuery::clamp_limit(Some(-5)), 1);
        assert_eq!(ViewLogQuery::clamp_limit(Some(50)), 50);
        assert_eq!(ViewLogQuery::clamp_limit(Some(10_000)), 200);
    }
}
