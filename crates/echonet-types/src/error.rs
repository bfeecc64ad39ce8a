//! Error types for core identifiers.

use thiserror::Error;

/// Errors that can occur while constructing core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The node identifier is empty.
    #[error("node id cannot be empty")]
    EmptyNodeId,

    /// The node identifier exceeds the maximum length.
    #[error("node id too long: {len} characters (max {max})")]
    NodeIdTooLong {
        /// Actual length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The node identifier contains a character that cannot appear in a topic name.
    #[error("invalid character {0:?} in node id")]
    InvalidNodeIdChar(char),

    /// The node identifier collides with a reserved topic suffix.
    #[error("node id {0:?} is reserved")]
    ReservedNodeId(String),
}

/// A specialized Result type for core type construction.
pub type Result<T> = std::result::Result<T, TypesError>;
