//! Error types for the command-line program

use std::io;
use std::path::PathBuf;

use tether_detect::DetectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read settings from {path}: {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings in {path}: {source}")]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    WriteSettings {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not determine the settings directory")]
    NoConfigDir,

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device not found; make sure it is connected and running the expected firmware")]
    DeviceNotFound,
}
