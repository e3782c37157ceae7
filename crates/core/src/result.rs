//! Core results and error types

use thiserror::Error;

/// Core error type encompassing all core module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read file at the specified path.
    #[error("could not read file '{path}': {source}")]
    FileRead {
        /// The path to the file that could not be read.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write file at the specified path.
    #[error("could not write file '{path}': {source}")]
    FileWrite {
        /// The path to the file that could not be written.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Module serialization or deserialization failed.
    #[error("module format error: {0}")]
    ModuleFormat(#[from] serde_json::Error),

    /// Invalid hexadecimal in seed.
    #[error("invalid hexadecimal in seed")]
    InvalidSeedHex,

    /// Invalid seed length.
    #[error("invalid seed length: expected 64 hex chars, got {0}")]
    InvalidSeedLength(usize),

    /// An instruction id was used that is not present in the body.
    #[error("instruction {0} not found in body")]
    InstructionNotFound(u32),

    /// A metadata id resolved outside its arena.
    #[error("dangling metadata reference: {0}")]
    DanglingReference(String),

    /// The method has no body where one is required.
    #[error("method '{0}' has no body")]
    MissingBody(String),
}

/// Core result type
pub type Result<T> = std::result::Result<T, Error>;
