use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stream id: {0:?}")]
    InvalidStreamId(String),

    #[error("Stream not found: {0}")]
    NotFound(String),

    #[error("Transcoder not found: {0}")]
    TranscoderNotFound(String),

    #[error("Failed to spawn transcoder: {0}")]
    Spawn(std::io::Error),

    /// The transcoder died inside the spawn grace window.
    #[error("Transcoder exited immediately ({status}): {diagnostics}")]
    ImmediateExit {
        status: ExitStatus,
        diagnostics: String,
    },

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("Transcoder check failed: {0}")]
    TranscoderCheck(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Config file not found at {0}")]
    NotFound(String),

    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Invalid config: {0}")]
    Invalid(String),
}
