use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures that prevent the server from starting or keep it from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client")]
    HttpClient(#[source] reqwest::Error),
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http server error")]
    Serve(#[source] std::io::Error),
}

/// Failures talking to the debrid REST API.
#[derive(Debug, Error)]
pub enum DebridError {
    #[error("debrid api returned {status} {status_text}")]
    Api {
        status: u16,
        status_text: String,
        body: String,
    },
    #[error("debrid request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected debrid response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to unrestrict link {link}")]
    Unrestrict {
        link: String,
        #[source]
        source: DebridError,
    },
}

/// Named stages of a submission, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Submit,
    SelectFiles,
    Poll,
    Resolve,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Submit => "submit",
            Stage::SelectFiles => "select_files",
            Stage::Poll => "poll",
            Stage::Resolve => "resolve",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("torrent submission failed")]
    Submission(#[source] DebridError),
    #[error("no files available in torrent {torrent_id}")]
    NoFilesAvailable { torrent_id: String },
    #[error("file selection failed for torrent {torrent_id}")]
    SelectFiles {
        torrent_id: String,
        #[source]
        source: DebridError,
    },
    #[error("status poll failed for torrent {torrent_id}")]
    Poll {
        torrent_id: String,
        #[source]
        source: DebridError,
    },
    #[error("remote processing failed for torrent {torrent_id}")]
    RemoteProcessing { torrent_id: String },
    #[error("timed out waiting for links of torrent {torrent_id} after {attempts} attempts")]
    PollTimeout { torrent_id: String, attempts: usize },
    #[error("link resolution failed")]
    Resolution(#[source] ResolveError),
}

impl WorkflowError {
    pub fn stage(&self) -> Stage {
        match self {
            WorkflowError::Submission(_) => Stage::Submit,
            WorkflowError::NoFilesAvailable { .. } | WorkflowError::SelectFiles { .. } => {
                Stage::SelectFiles
            }
            WorkflowError::Poll { .. }
            | WorkflowError::RemoteProcessing { .. }
            | WorkflowError::PollTimeout { .. } => Stage::Poll,
            WorkflowError::Resolution(_) => Stage::Resolve,
        }
    }
}

/// Renders an error followed by its `source()` chain, joined with `: `.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by HTTP handlers, rendered as `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// Remote bodies stay in the logs; callers only see the stage.
impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        match error {
            WorkflowError::NoFilesAvailable { .. } => {
                ApiError::bad_request("No files available in the torrent")
            }
            WorkflowError::Submission(_) => {
                ApiError::internal("Failed to submit torrent to the debrid service")
            }
            WorkflowError::SelectFiles { .. } => ApiError::internal("Failed to select torrent files"),
            WorkflowError::Poll { .. } => ApiError::internal("Failed to fetch torrent status"),
            WorkflowError::RemoteProcessing { .. } => ApiError::internal("Torrent processing failed"),
            WorkflowError::PollTimeout { .. } => {
                ApiError::internal("Timed out waiting for download links")
            }
            WorkflowError::Resolution(_) => ApiError::internal("Failed to unrestrict download links"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_files_maps_to_bad_request() {
        let error = ApiError::from(WorkflowError::NoFilesAvailable {
            torrent_id: "ABC".to_string(),
        });
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, "No files available in the torrent");
    }

    #[test]
    fn remote_body_is_not_leaked() {
        let error = ApiError::from(WorkflowError::Submission(DebridError::Api {
            status: 401,
            status_text: "Unauthorized".to_string(),
            body: "{\"error\":\"bad_token\"}".to_string(),
        }));
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("bad_token"));
    }

    #[test]
    fn error_chain_includes_every_cause() {
        let decode = serde_json::from_str::<u8>("\"x\"").expect_err("not a number");
        let error = WorkflowError::Poll {
            torrent_id: "ABC".to_string(),
            source: DebridError::Decode {
                endpoint: "/torrents/info/ABC".to_string(),
                source: decode,
            },
        };

        let rendered = error_chain(&error);
        assert!(rendered.starts_with(
            "status poll failed for torrent ABC: unexpected debrid response from /torrents/info/ABC: invalid type"
        ));
    }

    #[test]
    fn timeout_is_a_poll_stage_failure() {
        let error = WorkflowError::PollTimeout {
            torrent_id: "ABC".to_string(),
            attempts: 10,
        };
        assert_eq!(error.stage(), Stage::Poll);
        assert_eq!(
            ApiError::from(error).message,
            "Timed out waiting for download links"
        );
    }
}
