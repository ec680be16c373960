//! Error types for disha-amcl.

use thiserror::Error;

/// Localization error type.
///
/// Every variant is recovered locally by the coordinator: a failed event is
/// dropped (or deferred) and the filter is left untouched. The variants exist
/// so handlers can report *why* an event produced no output.
#[derive(Error, Debug)]
pub enum AmclError {
    #[error("transform unavailable: {0}")]
    TransformUnavailable(String),

    #[error("pose in frame \"{got}\" rejected; expected global frame \"{expected}\"")]
    FrameMismatch { got: String, expected: String },

    #[error("no map installed")]
    MapMissing,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::node::TransformError> for AmclError {
    fn from(e: crate::node::TransformError) -> Self {
        AmclError::TransformUnavailable(e.to_string())
    }
}

impl From<toml::de::Error> for AmclError {
    fn from(e: toml::de::Error) -> Self {
        AmclError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AmclError>;
