//! Error types for the speed test server.
//!
//! Peer disconnects are not errors: every session treats them as a normal
//! end. The types here cover configuration faults, transport failures that
//! end a single session, and malformed uploads.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error("Invalid listen address '{0}': {1}")]
    InvalidListen(String, std::net::AddrParseError),

    #[error("Invalid configuration: {0}")]
    InvalidValue(&'static str),
}

/// Errors that end a single measurement session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The peer closed the connection while a message was being sent.
    #[error("Peer closed the connection")]
    PeerClosed,

    /// The connection failed for a reason other than a peer disconnect.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A probe report could not be encoded.
    #[error("Failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    /// The prober received an event its current state cannot handle.
    #[error("Invalid transition: {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },
}

impl From<axum::Error> for SessionError {
    fn from(err: axum::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// Errors returned by the upload endpoint.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read upload body: {0}")]
    Body(#[from] axum::Error),

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Invalid multipart request: {0}")]
    MultipartRejection(#[from] axum::extract::multipart::MultipartRejection),

    #[error("Multipart body has no file part")]
    MissingFile,
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
