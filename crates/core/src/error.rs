use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(
        "missing credentials: {0}; set SCRY_TOKEN or add `token` to the config file"
    )]
    MissingCredentials(String),

    #[error("{method} {path} failed with status {status}: {message}")]
    ApiRequestFailed {
        method: String,
        path: String,
        status: u16,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    ValidationFailed(String),

    #[error(
        "no {kind} dataset detected; run `scry detect --explain` to inspect candidates or pin one with --dataset"
    )]
    NoDatasetDetected { kind: String },

    #[error(
        "dataset {dataset} is missing required fields: {}; run `scry detect --explain` or pin a different --dataset",
        missing.join(", ")
    )]
    RequiredFieldMissing {
        dataset: String,
        missing: Vec<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ScryError {
    /// Maps a non-2xx backend response onto the user-facing error kinds.
    pub fn from_status(method: &str, path: &str, status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            404 => Self::NotFound(format!("{path} ({message})")),
            400 | 422 => Self::ValidationFailed(message),
            401 | 403 => Self::ApiRequestFailed {
                method: method.to_string(),
                path: path.to_string(),
                status,
                message: format!("{message} (check SCRY_TOKEN and SCRY_ORG_ID)"),
            },
            _ => Self::ApiRequestFailed {
                method: method.to_string(),
                path: path.to_string(),
                status,
                message,
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::Parse(_) | Self::Config(_) => 2,
            Self::MissingCredentials(_) => 3,
            Self::NoDatasetDetected { .. } | Self::RequiredFieldMissing { .. } => 4,
            Self::ApiRequestFailed { .. }
            | Self::NotFound(_)
            | Self::ValidationFailed(_)
            | Self::Transport(_)
            | Self::InvalidResponse(_) => 5,
            Self::Internal(_) => 1,
        }
    }
}

fn extract_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "detail"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(200).collect()
}

pub type Result<T> = std::result::Result<T, ScryError>;
