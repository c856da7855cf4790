#![forbid(unsafe_code)]

//! # etx-rs
//!
//! A Rust library for reading, writing and converting EdgeTX/OpenTX radio
//! transmitter configurations.
//!
//! RC transmitters persist their settings in several on-disk shapes
//! depending on the board generation: raw EEPROM dumps, Intel HEX wrappers
//! around those dumps, `.etx`/`.otx` zip archives, and SD card directory
//! trees. This crate decodes all of them into one canonical document,
//! converts that document between firmware settings versions and between
//! radio boards, and encodes it back out, keeping an audit log of every
//! field a conversion had to adjust.
//!
//! ## Features
//!
//! - **Reading**: Load EEPROM dumps, Intel HEX files, `.etx`/`.otx`
//!   archives, and SD card directories into one canonical document
//! - **Writing**: Save a document back to any format its board supports
//! - **Conversion**: Move configurations between firmware versions and
//!   between radios, with an audit log of every adjusted field
//! - **Detection**: Recognize formats by content alone, never by file
//!   extension
//!
//! ## Supported boards
//!
//! The catalog covers the AVR-era 9X family, the ARM Sky9x/9XR-Pro
//! boards, the Taranis line, and the colour screen Horus/TX16S radios.
//! Settings format versions 216 through 221, the last being the YAML
//! storage generation, are understood; see [`SettingsVersion`] for the
//! conversion ladder.
//!
//! ## Quick Start
//!
//! ### Loading a file of any supported format
//!
//! ```no_run
//! use etx_rs::{Result, Storage};
//!
//! fn main() -> Result<()> {
//!     let loaded = Storage::open("models_and_settings.etx")?;
//!
//!     println!(
//!         "{} radio, {} of {} model slots used",
//!         loaded.document.board,
//!         loaded.document.models.used(),
//!         loaded.document.models.capacity(),
//!     );
//!     for entry in loaded.log.entries() {
//!         println!("{entry}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Moving a configuration to another radio
//!
//! ```no_run
//! use std::path::Path;
//!
//! use etx_rs::{BoardId, Result, SaveFormat, SettingsVersion, Storage};
//!
//! fn main() -> Result<()> {
//!     let storage = Storage::new();
//!     let loaded = Storage::open("taranis-x9d.bin")?;
//!
//!     let (doc, log) =
//!         storage.retarget(&loaded.document, BoardId::Tx16s, SettingsVersion::V221)?;
//!     if log.has_changes() {
//!         println!("{}", log.render_text());
//!     }
//!
//!     storage.save_to_file(&doc, Path::new("tx16s.etx"), SaveFormat::Archive, None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`boards`] | Board catalog: identifiers, geometry, capabilities |
//! | [`document`] | Canonical in-memory settings document |
//! | [`eeprom`] | Flat binary EEPROM image codec |
//! | [`hex`] | Intel HEX text wrapper around flat images |
//! | [`sdcard`] | SD card storage trees, YAML and legacy binary |
//! | [`archive`] | `.etx`/`.otx` zip archive codec |
//! | [`detect`] | Content-based format detection |
//! | [`convert`] | Version and board conversion with an audit log |
//! | [`checksum`] | Trailer checksum algorithms |
//! | [`progress`] | Progress reporting and cancellation |
//! | [`storage`] | High level [`Storage`] facade |
//! | [`error`] | Error types and [`Result`] alias |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`], which is an alias for
//! `std::result::Result<T, Error>`. The [`Error`] enum covers I/O
//! failures, malformed inputs, checksum and board mismatches, and
//! conversion targets a document cannot reach.

pub mod archive;
pub mod boards;
pub mod checksum;
pub mod convert;
pub mod detect;
pub mod document;
pub mod eeprom;
pub mod error;
pub mod hex;
pub mod progress;
pub mod sdcard;
pub mod storage;

// Re-export commonly used types at the crate root
pub use boards::{Board, BoardId, SettingsVersion};
pub use convert::{ConversionLog, LogEntry, Pipeline, RawRecord, Severity};
pub use detect::{DetectedFormat, detect_bytes, detect_path};
pub use document::{CanonicalDocument, ModelData, ModelSlots, RadioSettings};
pub use error::{Error, Result};
pub use progress::{ProgressEvent, ProgressFn, ProgressUnit};
pub use storage::{LoadOptions, LoadStatus, Loaded, SaveFormat, Storage};
