#![forbid(unsafe_code)]

//! Plumbing shared by the blocking HTTP clients (Supabase, YouTube Data API,
//! ratings API). Every remote failure is flattened into an [`UpstreamError`]
//! so the server can forward the upstream status and message verbatim.

use std::{fmt, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Failure reported by (or while talking to) a remote service.
///
/// `status` is the HTTP status the remote answered with, when there was one.
/// Transport errors and undecodable bodies carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Some(404), message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Pulls a human readable message out of an error body.
pub type MessageExtractor = fn(&Value) -> Option<String>;

/// Builds the agent every client uses. One agent per client keeps connection
/// pooling per remote host.
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Decodes a successful JSON response, or converts the failure into an
/// [`UpstreamError`] using `extract` on the error body and `fallback` when the
/// body has nothing useful.
pub fn read_json<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
    extract: MessageExtractor,
    fallback: &str,
) -> UpstreamResult<T> {
    let response = check_status(result, extract, fallback)?;
    response
        .into_json::<T>()
        .map_err(|err| UpstreamError::internal(format!("decoding upstream response: {err}")))
}

/// Same as [`read_json`] but discards the body of a successful response.
pub fn read_empty(
    result: Result<ureq::Response, ureq::Error>,
    extract: MessageExtractor,
    fallback: &str,
) -> UpstreamResult<()> {
    check_status(result, extract, fallback).map(|_| ())
}

fn check_status(
    result: Result<ureq::Response, ureq::Error>,
    extract: MessageExtractor,
    fallback: &str,
) -> UpstreamResult<ureq::Response> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_json::<Value>().ok();
            Err(UpstreamError::new(
                Some(code),
                message_or(body.as_ref(), extract, fallback),
            ))
        }
        Err(ureq::Error::Transport(err)) => Err(UpstreamError::internal(err.to_string())),
    }
}

fn message_or(body: Option<&Value>, extract: MessageExtractor, fallback: &str) -> String {
    body.and_then(extract)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// `{"error": "..."}`, used by the ratings API.
pub fn top_level_error(body: &Value) -> Option<String> {
    body.get("error").and_then(Value::as_str).map(str::to_string)
}

/// `{"message": "..."}`, used by PostgREST and Supabase auth.
pub fn top_level_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("msg"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `{"error": {"message": "..."}}`, used by Google APIs.
pub fn nested_error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
