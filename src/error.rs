//! Unified error types for wavemesh

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for wavemesh operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),

    // Radio pool errors
    #[error(
        "All {max} wireless interfaces are in use; raise 'max_wireless_interface_count' to create more"
    )]
    ResourceExhausted { max: usize },

    #[error(
        "Cannot re-provision the radio pool to {requested} interfaces while {in_use} are in use"
    )]
    PoolResize { requested: usize, in_use: usize },

    #[error("Wireless interface {0} is not known to this context")]
    UnknownInterface(String),

    // Membership errors
    #[error("Node '{0}' is not an access point")]
    NotAnAccessPoint(String),

    #[error("Node '{0}' is not part of any wireless network")]
    NotInNetwork(String),

    #[error("No wireless network found with SSID '{0}'")]
    NoSuchNetwork(String),

    #[error("A wireless network with SSID '{0}' already exists")]
    NetworkAlreadyExists(String),

    #[error("Node '{0}' cannot join the BSS it is hosting")]
    SelfAssociation(String),

    #[error("Node '{0}' appears more than once in the same request")]
    DuplicateNode(String),

    #[error("Invalid membership transition for node '{node}': {message}")]
    InvalidTransition { node: String, message: String },

    // Addressing errors
    #[error("Addressing error: {0}")]
    Addressing(String),

    // External command errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Unexpected command output: {0}")]
    OutputParse(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type alias for wavemesh operations
pub type Result<T> = std::result::Result<T, Error>;
