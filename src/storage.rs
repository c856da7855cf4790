//! High level load/save facade.
//!
//! Ties the engine together: detect the input's format, run the matching
//! codec, lift the decoded record through the conversion pipeline, and
//! hand the caller a [`CanonicalDocument`] with the audit log of
//! everything that was repaired on the way in. Saving is the mirror
//! image, with the document denormalized for its own board and version
//! and encoded by the codec the chosen [`SaveFormat`] names.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::archive::{self, ArchiveReadReport};
use crate::boards::{BoardId, SettingsVersion};
use crate::convert::{ConversionLog, Pipeline, RawRecord, Severity};
use crate::detect::{self, DetectedFormat};
use crate::document::CanonicalDocument;
use crate::eeprom::{DecodeOptions, EepromImage};
use crate::error::{Error, Result};
use crate::hex;
use crate::progress::{ProgressFn, ProgressUnit};
use crate::sdcard;

/// Load options. The defaults are fully strict.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Board the caller expects. Input for a different board fails with
    /// [`Error::WrongBoard`] unless [`force_board`](Self::force_board) is
    /// set.
    pub expected_board: Option<BoardId>,
    /// Proceed past a board mismatch, keeping the input's own board. The
    /// mismatch is logged as a warning.
    pub force_board: bool,
    /// Accept a flat image whose trailer checksum does not verify. The
    /// mismatch is logged as a warning.
    pub ignore_checksum: bool,
}

/// Save target selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// Flat binary EEPROM image.
    Eeprom,
    /// Intel HEX text wrapping the flat image.
    Hex,
    /// `.etx` / `.otx` zip archive.
    Archive,
    /// Storage directory tree.
    Directory,
}

/// Outcome classification of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Decoded without changing or dropping anything.
    Clean,
    /// Usable, but the log carries changes the caller should review.
    Warnings,
}

/// A loaded document plus the audit log produced while decoding it.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub document: CanonicalDocument,
    pub log: ConversionLog,
}

impl Loaded {
    /// True when the load changed or dropped data the caller should
    /// review.
    pub fn has_warnings(&self) -> bool {
        self.log.worst().is_some_and(|s| s >= Severity::Warning)
    }

    pub fn status(&self) -> LoadStatus {
        if self.has_warnings() { LoadStatus::Warnings } else { LoadStatus::Clean }
    }
}

/// The storage engine: format detection, codecs and the conversion
/// pipeline behind one door.
#[derive(Debug, Clone, Default)]
pub struct Storage {
    pipeline: Pipeline,
}

impl Storage {
    /// Engine with the standard conversion rule table.
    pub fn new() -> Storage {
        Storage::default()
    }

    /// Engine with a caller-supplied pipeline.
    pub fn with_pipeline(pipeline: Pipeline) -> Storage {
        Storage { pipeline }
    }

    /// One-call load with default options.
    ///
    /// # Arguments
    /// * `path` - A flat image, HEX file, archive, or storage directory.
    ///
    /// # Returns
    /// The canonical document and its conversion log, or the error that
    /// stopped the load.
    pub fn open(path: impl AsRef<Path>) -> Result<Loaded> {
        Storage::new().load(path.as_ref(), LoadOptions::default(), None)
    }

    /// Load a document from a path of any supported format.
    pub fn load(
        &self,
        path: &Path,
        opts: LoadOptions,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Loaded> {
        match detect::detect_path(path)? {
            DetectedFormat::Directory => {
                let record = sdcard::read_dir(path, progress)?;
                self.finish_load(RawRecord::Sdcard(record), opts, None, None)
            }
            DetectedFormat::Archive => {
                let (record, report) = archive::read_archive(path, progress)?;
                self.finish_load(RawRecord::Sdcard(record), opts, Some(report), None)
            }
            DetectedFormat::Eeprom { board } => {
                let bytes = fs::read(path)?;
                self.load_flat(&bytes, board, opts)
            }
            DetectedFormat::Hex { board } => {
                let text = fs::read_to_string(path)?;
                let bytes = hex::decode_text(&text)?;
                self.load_flat(&bytes, board, opts)
            }
        }
    }

    /// Load a document from an in-memory buffer. Directories cannot
    /// arrive this way; everything else can.
    pub fn load_bytes(&self, bytes: &[u8], opts: LoadOptions) -> Result<Loaded> {
        match detect::detect_bytes(bytes)? {
            DetectedFormat::Archive => {
                let (record, report) =
                    archive::read_archive_from(std::io::Cursor::new(bytes), None)?;
                self.finish_load(RawRecord::Sdcard(record), opts, Some(report), None)
            }
            DetectedFormat::Eeprom { board } => self.load_flat(bytes, board, opts),
            DetectedFormat::Hex { board } => {
                let flat = hex::decode_text(&String::from_utf8_lossy(bytes))?;
                self.load_flat(&flat, board, opts)
            }
            DetectedFormat::Directory => Err(Error::UnrecognizedFormat),
        }
    }

    fn load_flat(&self, bytes: &[u8], board: BoardId, opts: LoadOptions) -> Result<Loaded> {
        let mut checksum_note = None;
        let image = match EepromImage::decode(bytes, board) {
            Err(Error::ChecksumMismatch { stored, computed }) if opts.ignore_checksum => {
                checksum_note = Some((stored, computed));
                EepromImage::decode_with(bytes, board, DecodeOptions { ignore_checksum: true })?
            }
            other => other?,
        };
        self.finish_load(RawRecord::Eeprom(image), opts, None, checksum_note)
    }

    fn finish_load(
        &self,
        raw: RawRecord,
        opts: LoadOptions,
        report: Option<ArchiveReadReport>,
        checksum_note: Option<(u16, u16)>,
    ) -> Result<Loaded> {
        let found = raw.board();
        let mut forced_expectation = None;
        if let Some(expected) = opts.expected_board {
            if expected != found {
                if !opts.force_board {
                    return Err(Error::WrongBoard { expected, found });
                }
                forced_expectation = Some(expected);
            }
        }

        let (document, mut log) = self.pipeline.normalize(&raw);

        log.set_component("Storage");
        if let Some((stored, computed)) = checksum_note {
            log.warning(
                "checksum",
                "",
                format!("{stored:#06x}"),
                "mismatch ignored",
                format!("{computed:#06x}"),
            );
        }
        if let Some(expected) = forced_expectation {
            log.warning(
                "board",
                "",
                found.to_string(),
                "differs from expected, loaded anyway",
                expected.to_string(),
            );
        }
        if let Some(report) = report {
            for name in report.damaged() {
                log.warning("member", "", name.to_string(), "size mismatch, skipped", "");
            }
        }

        info!(
            target: "etx_rs::storage",
            board = %document.board,
            version = %document.version,
            models = document.models.used(),
            "loaded document"
        );
        Ok(Loaded { document, log })
    }

    /// Save a document to `path` in the chosen format, for the document's
    /// own board and version.
    ///
    /// # Returns
    /// The log of anything denormalization had to change, usually empty
    /// for a document that already fits its board.
    pub fn save_to_file(
        &self,
        doc: &CanonicalDocument,
        path: &Path,
        format: SaveFormat,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ConversionLog> {
        let log = match format {
            SaveFormat::Directory => {
                let (record, log) = self.pipeline.denormalize_tree(doc, doc.board, doc.version)?;
                sdcard::write_dir(path, &record, progress)?;
                log
            }
            SaveFormat::Archive => {
                let (record, log) = self.pipeline.denormalize_tree(doc, doc.board, doc.version)?;
                archive::write_archive(path, &record, ProgressUnit::Entries, progress)?;
                log
            }
            SaveFormat::Eeprom => {
                let (image, log) = self.flat_image(doc)?;
                fs::write(path, image.encode()?)?;
                log
            }
            SaveFormat::Hex => {
                let (image, log) = self.flat_image(doc)?;
                fs::write(path, hex::encode_image(&image)?)?;
                log
            }
        };
        info!(
            target: "etx_rs::storage",
            path = %path.display(),
            format = ?format,
            "saved document"
        );
        Ok(log)
    }

    /// Serialize a document to bytes in the chosen format. `Directory`
    /// has no byte form and is rejected.
    pub fn save_bytes(
        &self,
        doc: &CanonicalDocument,
        format: SaveFormat,
    ) -> Result<(Vec<u8>, ConversionLog)> {
        match format {
            SaveFormat::Eeprom => {
                let (image, log) = self.flat_image(doc)?;
                Ok((image.encode()?, log))
            }
            SaveFormat::Hex => {
                let (image, log) = self.flat_image(doc)?;
                Ok((hex::encode_image(&image)?.into_bytes(), log))
            }
            SaveFormat::Archive => {
                let (record, log) = self.pipeline.denormalize_tree(doc, doc.board, doc.version)?;
                Ok((archive::write_archive_bytes(&record)?, log))
            }
            SaveFormat::Directory => Err(Error::IncompatibleTarget {
                board: doc.board,
                version: doc.version,
                target: "in-memory directory",
            }),
        }
    }

    /// Convert a document to another settings version.
    pub fn convert(
        &self,
        doc: &CanonicalDocument,
        version: SettingsVersion,
    ) -> Result<(CanonicalDocument, ConversionLog)> {
        self.pipeline.convert(doc, version)
    }

    /// Convert a document to another board and version in one pass.
    pub fn retarget(
        &self,
        doc: &CanonicalDocument,
        board: BoardId,
        version: SettingsVersion,
    ) -> Result<(CanonicalDocument, ConversionLog)> {
        self.pipeline.retarget(doc, board, version)
    }

    /// The conversion pipeline behind this engine.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn flat_image(&self, doc: &CanonicalDocument) -> Result<(EepromImage, ConversionLog)> {
        let (record, log) = self.pipeline.denormalize(doc, doc.board, doc.version)?;
        match record {
            RawRecord::Eeprom(image) => Ok((image, log)),
            RawRecord::Sdcard(record) => Err(Error::IncompatibleTarget {
                board: record.board(),
                version: record.version(),
                target: "flat image",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eeprom::test_support::{blank_image, seal};

    #[test]
    fn wrong_board_is_rejected_then_forced() {
        let storage = Storage::new();
        let bytes = blank_image(BoardId::TaranisX7, SettingsVersion::V218);

        let strict = LoadOptions {
            expected_board: Some(BoardId::TaranisX9d),
            ..LoadOptions::default()
        };
        match storage.load_bytes(&bytes, strict).unwrap_err() {
            Error::WrongBoard { expected, found } => {
                assert_eq!(expected, BoardId::TaranisX9d);
                assert_eq!(found, BoardId::TaranisX7);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let forced = LoadOptions { force_board: true, ..strict };
        let loaded = storage.load_bytes(&bytes, forced).unwrap();
        // the file's own board wins; the mismatch is on record
        assert_eq!(loaded.document.board, BoardId::TaranisX7);
        assert_eq!(loaded.status(), LoadStatus::Warnings);
        assert!(loaded.log.entries().iter().any(|e| e.field == "board"));
    }

    #[test]
    fn damaged_checksum_needs_explicit_permission() {
        let storage = Storage::new();
        let mut bytes = blank_image(BoardId::Stock9x, SettingsVersion::V216);
        bytes[4] = 65;
        seal(BoardId::Stock9x, &mut bytes);
        bytes[40] ^= 0x01; // flip one payload bit, do not reseal

        assert!(matches!(
            storage.load_bytes(&bytes, LoadOptions::default()).unwrap_err(),
            Error::ChecksumMismatch { .. }
        ));

        let opts = LoadOptions { ignore_checksum: true, ..LoadOptions::default() };
        let loaded = storage.load_bytes(&bytes, opts).unwrap();
        assert!(loaded.has_warnings());
        let note = loaded
            .log
            .entries()
            .iter()
            .find(|e| e.field == "checksum")
            .expect("checksum warning");
        assert_eq!(note.action, "mismatch ignored");
    }

    #[test]
    fn save_bytes_rejects_flat_target_for_sdcard_board() {
        let storage = Storage::new();
        let doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
        match storage.save_bytes(&doc, SaveFormat::Eeprom).unwrap_err() {
            Error::IncompatibleTarget { board, target, .. } => {
                assert_eq!(board, BoardId::Tx16s);
                assert_eq!(target, "flat image");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn eeprom_bytes_roundtrip_through_load() {
        use crate::document::ModelData;

        let storage = Storage::new();
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);
        doc.radio.contrast = 28;
        doc.models.set(4, Some(ModelData::named("Cub")));

        let (bytes, save_log) = storage.save_bytes(&doc, SaveFormat::Eeprom).unwrap();
        assert!(save_log.is_empty());
        let loaded = storage.load_bytes(&bytes, LoadOptions::default()).unwrap();
        assert_eq!(loaded.document, doc);
        assert_eq!(loaded.status(), LoadStatus::Clean);
    }

    #[test]
    fn hex_bytes_roundtrip_through_load() {
        let storage = Storage::new();
        let mut doc = CanonicalDocument::new(BoardId::Sky9x, SettingsVersion::V218);
        doc.radio.stick_mode = 2;

        let (text, _) = storage.save_bytes(&doc, SaveFormat::Hex).unwrap();
        assert!(text.starts_with(b":"));
        let loaded = storage.load_bytes(&text, LoadOptions::default()).unwrap();
        assert_eq!(loaded.document, doc);
    }

    #[test]
    fn archive_bytes_roundtrip_through_load() {
        use crate::document::ModelData;

        let storage = Storage::new();
        let mut doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
        let mut model = ModelData::named("Ka8");
        model.add_label("Gliders");
        doc.models.set(0, Some(model));

        let (bytes, _) = storage.save_bytes(&doc, SaveFormat::Archive).unwrap();
        let loaded = storage.load_bytes(&bytes, LoadOptions::default()).unwrap();
        assert_eq!(loaded.document, doc);
    }
}
