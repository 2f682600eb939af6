//! Error types shared across osdburn crates.

use std::path::PathBuf;

/// Top-level error type for osdburn operations.
#[derive(Debug, thiserror::Error)]
pub enum OsdburnError {
    #[error("Font error: {message}")]
    Font { message: String },

    #[error("Telemetry error: {message}")]
    Telemetry { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using OsdburnError.
pub type OsdburnResult<T> = Result<T, OsdburnError>;

impl OsdburnError {
    pub fn font(msg: impl Into<String>) -> Self {
        Self::Font {
            message: msg.into(),
        }
    }

    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_constructors_format_messages() {
        let err = OsdburnError::font("sheet height 100 is not a multiple of 256");
        assert_eq!(
            err.to_string(),
            "Font error: sheet height 100 is not a multiple of 256"
        );

        let err = OsdburnError::FileNotFound {
            path: PathBuf::from("/tmp/missing.osd"),
        };
        assert!(err.to_string().contains("missing.osd"));
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: OsdburnError = io.into();
        assert!(matches!(err, OsdburnError::Io(_)));
    }
}
