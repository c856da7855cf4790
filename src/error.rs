//! Error types for storage operations.
//!
//! This module defines the [`Error`] enum which represents all possible
//! failures that can occur when reading, writing or converting radio
//! settings storage.
//!
//! # Example
//!
//! ```no_run
//! use etx_rs::{Error, Result, Storage};
//!
//! fn open(path: &str) -> Result<()> {
//!     match Storage::open(path) {
//!         Ok(loaded) => {
//!             println!("loaded {} for {}", loaded.document.version, loaded.document.board);
//!             Ok(())
//!         }
//!         Err(Error::ChecksumMismatch { stored, computed }) => {
//!             eprintln!("image damaged: stored {stored:#06x}, computed {computed:#06x}");
//!             Err(Error::ChecksumMismatch { stored, computed })
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use thiserror::Error;

use crate::boards::{BoardId, SettingsVersion};

/// Result type alias used throughout the library.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur while reading, writing or converting radio
/// settings storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Input bytes match none of the supported containers.
    #[error("unrecognized storage format")]
    UnrecognizedFormat,

    /// Input length matches more than one board and no header field
    /// settles the tie.
    #[error("image matches several boards: {}", join_board_names(.candidates))]
    AmbiguousFormat {
        /// Boards the input is compatible with, catalog order.
        candidates: Vec<BoardId>,
    },

    /// Image length does not match the selected board.
    #[error("size mismatch: got {actual} bytes, expected {expected}{}", detail_suffix(.detail))]
    SizeMismatch {
        actual: usize,
        expected: usize,
        /// Extra diagnosis, e.g. a doubled size hinting at a board mixup.
        detail: String,
    },

    /// Stored trailer checksum disagrees with the computed one.
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { stored: u16, computed: u16 },

    /// A board identifier (name or variant code) is not in the catalog.
    #[error("unknown board: {name}")]
    UnknownBoard { name: String },

    /// The input declares a different board than the caller expects.
    #[error("wrong board: file is for {found}, expected {expected}")]
    WrongBoard { expected: BoardId, found: BoardId },

    /// Storage version byte is outside the supported set.
    #[error("unsupported settings version {version}")]
    UnknownVersion { version: u8 },

    /// A storage directory or archive is structurally broken.
    #[error("corrupt storage: {detail}")]
    CorruptFilesystem { detail: String },

    /// A required archive member or directory file is absent.
    #[error("missing required entry: {name}")]
    MissingRequiredEntry { name: String },

    /// Directory enumeration failed partway through.
    #[error("cannot list files under {path}")]
    CannotListFiles { path: String },

    /// Stale file cleanup failed while writing a storage directory.
    #[error("error deleting files under {path}")]
    ErrorDeletingFiles { path: String },

    /// A canonical value cannot be represented in the target layout.
    /// Encoding never clamps silently; conversion must run first.
    #[error("field {field} = {value} out of range for {board} {version}")]
    FieldOutOfRange {
        field: String,
        value: String,
        board: BoardId,
        version: SettingsVersion,
    },

    /// Intel HEX text is malformed.
    #[error("hex parse error on line {line}: {reason}")]
    HexParse { line: usize, reason: String },

    /// The requested save target cannot hold this document as-is.
    #[error("cannot save {board} {version} as {target}")]
    IncompatibleTarget {
        board: BoardId,
        version: SettingsVersion,
        target: &'static str,
    },

    /// A conversion rule table failed validation at construction.
    #[error("invalid rule table: {detail}")]
    InvalidRuleTable { detail: String },

    /// A progress callback asked to stop.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse or emit failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Zip container failure.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

fn join_board_names(candidates: &[BoardId]) -> String {
    let names: Vec<&str> = candidates.iter().map(|b| b.display_name()).collect();
    names.join(", ")
}

fn detail_suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    }
}
