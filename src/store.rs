#![forbid(unsafe_code)]

//! Persistence for works and view logs, plus session lookups, all backed by
//! Supabase. Tables are reached through PostgREST (`/rest/v1`), sessions
//! through GoTrue (`/auth/v1`).

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::models::{NewViewLog, ViewLog, ViewLogQuery, Work, WorkRefresh, WorkUpsert};
use crate::upstream::{
    UpstreamError, UpstreamResult, build_agent, read_empty, read_json, top_level_message,
};

const WORKS_TABLE: &str = "youtube_works";
const VIEW_LOGS_TABLE: &str = "youtube_view_logs";
const TOTAL_VIEWS_RPC: &str = "rpc/youtube_total_views";

const WORK_COLUMNS: &str = "id,youtube_url,note,created_at,video_id,video_title,channel_id,channel_title,channel_avatar_url,thumbnail_url,view_count";
const VIEW_LOG_COLUMNS: &str = "id,work_id,video_id,youtube_url,view_count,fetched_at";

const RETURN_ROWS: &str = "return=representation";
const RETURN_NOTHING: &str = "return=minimal";
const MERGE_ON_CONFLICT: &str = "resolution=merge-duplicates,return=representation";

/// Storage for the portfolio tables. Implementations block; async callers
/// are expected to hop onto a blocking thread.
pub trait PortfolioStore: Send + Sync {
    /// All works, newest first.
    fn list_works(&self) -> UpstreamResult<Vec<Work>>;
    fn find_work(&self, id: i64) -> UpstreamResult<Option<Work>>;
    /// Inserts a work or merges into the row with the same `video_id`.
    fn upsert_work(&self, work: &WorkUpsert) -> UpstreamResult<Work>;
    fn refresh_work(&self, id: i64, patch: &WorkRefresh) -> UpstreamResult<Work>;
    fn set_work_views(&self, id: i64, view_count: i64) -> UpstreamResult<()>;
    /// Removes a work together with its view logs.
    fn delete_work(&self, id: i64) -> UpstreamResult<()>;
    fn insert_view_log(&self, log: &NewViewLog) -> UpstreamResult<ViewLog>;
    /// Matching view logs, most recent `fetched_at` first, capped at `query.limit`.
    fn list_view_logs(&self, query: &ViewLogQuery) -> UpstreamResult<Vec<ViewLog>>;
    fn delete_view_log(&self, id: i64) -> UpstreamResult<()>;
    /// Sum of the latest view counts across all works.
    fn total_views(&self) -> UpstreamResult<i64>;
}

/// Resolves a browser session into the signed-in user's email.
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when the token is not (or no longer) a valid session.
    fn user_email(&self, access_token: &str) -> UpstreamResult<Option<String>>;
}

/// Blocking Supabase client authenticated with the project's anon key.
pub struct SupabaseClient {
    agent: ureq::Agent,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    email: Option<String>,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    fn rest(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}/rest/v1/{path}", self.base_url))
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {}", self.anon_key))
    }

    fn first_row<T>(rows: Vec<T>, missing: &str) -> UpstreamResult<T> {
        rows.into_iter()
            .next()
            .ok_or_else(|| UpstreamError::not_found(missing))
    }
}

impl PortfolioStore for SupabaseClient {
    fn list_works(&self) -> UpstreamResult<Vec<Work>> {
        let result = self
            .rest("GET", WORKS_TABLE)
            .query("select", WORK_COLUMNS)
            .query("order", "created_at.desc")
            .call();
        read_json(result, top_level_message, "Failed to load works")
    }

    fn find_work(&self, id: i64) -> UpstreamResult<Option<Work>> {
        let result = self
            .rest("GET", WORKS_TABLE)
            .query("select", WORK_COLUMNS)
            .query("id", &format!("eq.{id}"))
            .query("limit", "1")
            .call();
        let rows: Vec<Work> = read_json(result, top_level_message, "Failed to load work")?;
        Ok(rows.into_iter().next())
    }

    fn upsert_work(&self, work: &WorkUpsert) -> UpstreamResult<Work> {
        let result = self
            .rest("POST", WORKS_TABLE)
            .query("on_conflict", "video_id")
            .set("Prefer", MERGE_ON_CONFLICT)
            .send_json(work);
        let rows = read_json(result, top_level_message, "Failed to save work")?;
        Self::first_row(rows, "Saved work was not returned")
    }

    fn refresh_work(&self, id: i64, patch: &WorkRefresh) -> UpstreamResult<Work> {
        let result = self
            .rest("PATCH", WORKS_TABLE)
            .query("id", &format!("eq.{id}"))
            .set("Prefer", RETURN_ROWS)
            .send_json(patch);
        let rows = read_json(result, top_level_message, "Failed to refresh")?;
        Self::first_row(rows, "Work not found")
    }

    fn set_work_views(&self, id: i64, view_count: i64) -> UpstreamResult<()> {
        let result = self
            .rest("PATCH", WORKS_TABLE)
            .query("id", &format!("eq.{id}"))
            .set("Prefer", RETURN_NOTHING)
            .send_json(json!({ "view_count": view_count }));
        read_empty(result, top_level_message, "Failed to update view count")
    }

    fn delete_work(&self, id: i64) -> UpstreamResult<()> {
        // Logs go first in case the foreign key has no ON DELETE CASCADE.
        let logs = self
            .rest("DELETE", VIEW_LOGS_TABLE)
            .query("work_id", &format!("eq.{id}"))
            .call();
        if let Err(err) = read_empty(logs, top_level_message, "Failed to delete view logs") {
            tracing::warn!(work_id = id, error = %err, "could not delete view logs of work");
        }

        let result = self
            .rest("DELETE", WORKS_TABLE)
            .query("id", &format!("eq.{id}"))
            .call();
        read_empty(result, top_level_message, "Failed to delete work")
    }

    fn insert_view_log(&self, log: &NewViewLog) -> UpstreamResult<ViewLog> {
        let result = self
            .rest("POST", VIEW_LOGS_TABLE)
            .set("Prefer", RETURN_ROWS)
            .send_json(log);
        let rows = read_json(result, top_level_message, "Failed to log views")?;
        Self::first_row(rows, "Inserted view log was not returned")
    }

    fn list_view_logs(&self, query: &ViewLogQuery) -> UpstreamResult<Vec<ViewLog>> {
        let mut request = self
            .rest("GET", VIEW_LOGS_TABLE)
            .query("select", VIEW_LOG_COLUMNS)
            .query("order", "fetched_at.desc")
            .query("limit", &query.limit.to_string());
        for (column, filter) in view_log_filters(query) {
            request = request.query(column, &filter);
        }
        read_json(request.call(), top_level_message, "Failed to load view logs")
    }

    fn delete_view_log(&self, id: i64) -> UpstreamResult<()> {
        let result = self
            .rest("DELETE", VIEW_LOGS_TABLE)
            .query("id", &format!("eq.{id}"))
            .call();
        read_empty(result, top_level_message, "Failed to delete view log")
    }

    fn total_views(&self) -> UpstreamResult<i64> {
        let result = self.rest("POST", TOTAL_VIEWS_RPC).send_json(json!({}));
        let value: Value = read_json(result, top_level_message, "Failed to load total views")?;
        Ok(coerce_count(&value))
    }
}

impl IdentityProvider for SupabaseClient {
    fn user_email(&self, access_token: &str) -> UpstreamResult<Option<String>> {
        let result = self
            .agent
            .get(&format!("{}/auth/v1/user", self.base_url))
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {access_token}"))
            .call();
        match result {
            Err(ureq::Error::Status(401 | 403, _)) => Ok(None),
            other => {
                let user: AuthUser =
                    read_json(other, top_level_message, "Failed to verify session")?;
                Ok(user.email.filter(|email| !email.trim().is_empty()))
            }
        }
    }
}

fn view_log_filters(query: &ViewLogQuery) -> Vec<(&'static str, String)> {
    let mut filters = Vec::new();
    if let Some(work_id) = query.work_id {
        filters.push(("work_id", format!("eq.{work_id}")));
    }
    if let Some(video_id) = &query.video_id {
        filters.push(("video_id", format!("eq.{video_id}")));
    }
    filters
}

/// RPC results come back as a bare number, a numeric string or `null`.
fn coerce_count(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map(|float| float as i64)
            .unwrap_or(0),
        _ => 0,
    }
}
