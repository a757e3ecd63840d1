#![forbid(unsafe_code)]

//! Client for the external channel-ratings (testimonials) API.

use std::time::Duration;

use crate::models::{ChannelRating, RatingDeleted, RatingSubmission, RatingSubmitted};
use crate::upstream::{UpstreamResult, build_agent, read_json, top_level_error};

pub const MIN_STARS: i64 = 1;
pub const MAX_STARS: i64 = 5;

pub trait RatingsApi: Send + Sync {
    fn list(&self) -> UpstreamResult<Vec<ChannelRating>>;
    fn submit(&self, submission: &RatingSubmission) -> UpstreamResult<RatingSubmitted>;
    fn delete(&self, id: i64) -> UpstreamResult<RatingDeleted>;
}

pub struct RatingsClient {
    agent: ureq::Agent,
    base_url: String,
}

impl RatingsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl RatingsApi for RatingsClient {
    fn list(&self) -> UpstreamResult<Vec<ChannelRating>> {
        let result = self
            .agent
            .get(&format!("{}/api/channels", self.base_url))
            .call();
        read_json(result, top_level_error, "Failed to fetch")
    }

    fn submit(&self, submission: &RatingSubmission) -> UpstreamResult<RatingSubmitted> {
        let result = self
            .agent
            .post(&format!("{}/api/submit-channel", self.base_url))
            .send_json(submission);
        read_json(result, top_level_error, "Failed to submit")
    }

    fn delete(&self, id: i64) -> UpstreamResult<RatingDeleted> {
        let result = self
            .agent
            .delete(&format!("{}/api/channels/{id}", self.base_url))
            .call();
        read_json(result, top_level_error, "Failed to delete")
    }
}

/// Trims and checks a submission before it is forwarded.
/// The error string is meant to be shown to the admin as-is.
pub fn validate_submission(raw: RatingSubmission) -> Result<RatingSubmission, &'static str> {
    let youtube_handle = raw.youtube_handle.trim().to_string();
    let comment = raw.comment.trim().to_string();
    if youtube_handle.is_empty() {
        return Err("YouTube handle is required");
    }
    if !(MIN_STARS..=MAX_STARS).contains(&raw.stars) {
        return Err("Stars must be between 1 and 5");
    }
    if comment.is_empty() {
        return Err("Comment is required");
    }
    Ok(RatingSubmission {
        youtube_handle,
        stars: raw.stars,
        comment,
    })
}

/// Newest testimonials first. Unparseable timestamps sort as strings, which
/// is still chronological for the RFC 3339 values the API emits.
pub fn sort_newest_first(ratings: &mut [ChannelRating]) {
    ratings.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
}
