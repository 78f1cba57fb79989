//! Crate-wide error type.
//!
//! Invariant violations (bad square indices, wrong feature-tensor shapes,
//! impossible move encodings) are implementation bugs and are reported via
//! `assert!`/`panic!`, not this enum — see SPEC_FULL.md §7.

use thiserror::Error;

/// Errors that can occur at the boundaries of the core (arena server,
/// experience persistence, network backend).
#[derive(Debug, Error)]
pub enum Error {
    /// A move string or a submitted move was not legal in the position it
    /// was played against.
    #[error("not a legal move: {0}")]
    IllegalMove(String),

    /// An experience file's length was not a multiple of the fixed record
    /// size; the whole file is rejected, there is no partial load.
    #[error(
        "corrupt experience file: size {actual} is not a multiple of the record size {expected_multiple_of}"
    )]
    CorruptExperienceFile {
        expected_multiple_of: usize,
        actual: usize,
    },

    /// The neural-network backend failed to produce a result. Treated as
    /// fatal: there is no meaningful recovery when the model is unavailable.
    #[error("network backend failure: {0}")]
    NetworkBackendFailure(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure while reading/writing experience records or config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
