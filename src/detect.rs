//! Format detection.
//!
//! Looks at structure, not file extensions: zip magic first, then the
//! storage directory markers, then catalog image sizes, then an Intel HEX
//! probe. The first structural match wins; when several boards share an
//! image size and the variant header does not settle the tie, detection
//! reports [`Error::AmbiguousFormat`] instead of guessing.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::boards::BoardId;
use crate::eeprom::{VARIANT_OFFSET, read_u16};
use crate::error::{Error, Result};
use crate::{archive, hex, sdcard};

/// The storage format of an input, with the board resolved where the
/// format implies one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedFormat {
    /// Zip archive (`.etx` / `.otx`).
    Archive,
    /// Storage directory tree.
    Directory,
    /// Flat EEPROM image for `board`.
    Eeprom { board: BoardId },
    /// Intel HEX text wrapping a flat image for `board`.
    Hex { board: BoardId },
}

/// Detect the format of an in-memory buffer.
pub fn detect_bytes(bytes: &[u8]) -> Result<DetectedFormat> {
    if archive::looks_like_archive(bytes) {
        return Ok(DetectedFormat::Archive);
    }
    if let Some(flat) = detect_flat(bytes) {
        return flat.map(|board| DetectedFormat::Eeprom { board });
    }
    if hex::looks_like_hex(bytes) {
        let decoded = hex::decode_text(&String::from_utf8_lossy(bytes))?;
        if let Some(flat) = detect_flat(&decoded) {
            return flat.map(|board| DetectedFormat::Hex { board });
        }
    }
    Err(Error::UnrecognizedFormat)
}

/// Detect the format behind a path. A directory is checked for the
/// storage tree markers; a file is read and detected by content.
pub fn detect_path(path: &Path) -> Result<DetectedFormat> {
    if path.is_dir() {
        return if sdcard::is_storage_dir(path) {
            debug!(target: "etx_rs::detect", path = %path.display(), "storage directory");
            Ok(DetectedFormat::Directory)
        } else {
            Err(Error::UnrecognizedFormat)
        };
    }
    let bytes = fs::read(path)?;
    detect_bytes(&bytes)
}

/// Match a buffer length against catalog image sizes. `None` means the
/// length is not a flat image size at all; among candidates the variant
/// header settles the tie.
fn detect_flat(bytes: &[u8]) -> Option<Result<BoardId>> {
    let candidates = BoardId::with_eeprom_size(bytes.len());
    match candidates.as_slice() {
        [] => None,
        [only] => Some(Ok(*only)),
        _ => {
            let variant = read_u16(bytes, VARIANT_OFFSET);
            match candidates.iter().copied().find(|id| id.spec().variant == variant) {
                Some(board) => Some(Ok(board)),
                None => Some(Err(Error::AmbiguousFormat { candidates })),
            }
        }
    }
}
