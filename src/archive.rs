//! ETX/OTX archives.
//!
//! An archive is a zip container carrying the same entries as a storage
//! directory, so the two share [`SdcardRecord`] as their common currency.
//! Reading verifies every member against the size the central directory
//! declares and reports damaged members instead of aborting on them;
//! writing goes through a temporary sibling file that only replaces the
//! target once the archive is finalized.

use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressFn, ProgressUnit, notify};
use crate::sdcard::{RADIO_BIN, RADIO_YML, SdcardRecord};

const LOCAL_HEADER_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ARCHIVE_MAGIC: &[u8] = b"PK\x05\x06";

/// Zip comment stamped on every written archive.
fn tool_comment() -> String {
    format!("etx-rs {}", env!("CARGO_PKG_VERSION"))
}

/// Zip container probe used by format detection.
pub(crate) fn looks_like_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(LOCAL_HEADER_MAGIC) || bytes.starts_with(EMPTY_ARCHIVE_MAGIC)
}

/// Outcome for one archive member during a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Extracted and size-verified.
    Extracted,
    /// Declared and extracted sizes diverge; the member was skipped.
    SizeMismatch { declared: u64, actual: u64 },
    /// Directory marker, nothing to extract.
    Skipped,
}

/// Per-member outcomes of an archive read, in archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReadReport {
    pub entries: Vec<(String, EntryStatus)>,
}

impl ArchiveReadReport {
    /// True when every member extracted cleanly.
    pub fn is_clean(&self) -> bool {
        self.entries
            .iter()
            .all(|(_, status)| !matches!(status, EntryStatus::SizeMismatch { .. }))
    }

    /// Members that failed size verification.
    pub fn damaged(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|(name, status)| {
            matches!(status, EntryStatus::SizeMismatch { .. }).then_some(name.as_str())
        })
    }
}

/// Read an archive file.
pub fn read_archive(
    path: &Path,
    progress: Option<&mut ProgressFn<'_>>,
) -> Result<(SdcardRecord, ArchiveReadReport)> {
    let file = File::open(path)?;
    read_archive_from(file, progress)
}

/// Read an archive from any seekable source (a file or an in-memory
/// buffer behind a [`std::io::Cursor`]).
pub fn read_archive_from<R: Read + Seek>(
    reader: R,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<(SdcardRecord, ArchiveReadReport)> {
    let mut archive = ZipArchive::new(reader)?;
    if archive.is_empty() {
        return Err(Error::MissingRequiredEntry { name: format!("{RADIO_YML} or {RADIO_BIN}") });
    }

    let total = archive.len() as u64;
    let mut entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(archive.len());
    let mut report = ArchiveReadReport::default();

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let name = member.name().to_string();
        notify(
            &mut progress,
            ProgressEvent {
                unit: ProgressUnit::Entries,
                done: i as u64,
                total,
                current: Some(&name),
            },
        )?;

        if member.is_dir() {
            report.entries.push((name, EntryStatus::Skipped));
            continue;
        }

        let declared = member.size();
        let mut bytes = Vec::with_capacity(declared as usize);
        member.read_to_end(&mut bytes)?;
        if bytes.len() as u64 != declared {
            warn!(
                target: "etx_rs::archive",
                member = %name,
                declared,
                actual = bytes.len(),
                "member size disagrees with central directory, skipping"
            );
            report
                .entries
                .push((name, EntryStatus::SizeMismatch { declared, actual: bytes.len() as u64 }));
            continue;
        }

        report.entries.push((name.clone(), EntryStatus::Extracted));
        entries.push((name, bytes));
    }

    let record = SdcardRecord::from_entries(&entries)?;
    debug!(
        target: "etx_rs::archive",
        members = report.entries.len(),
        clean = report.is_clean(),
        "read archive"
    );
    Ok((record, report))
}

/// Write a record as an archive at `path`.
///
/// `unit` selects whether progress counts members or payload bytes; the
/// total is fixed by an enumeration pass before any compression starts. A
/// failure or cancellation leaves a pre-existing archive at `path`
/// untouched.
pub fn write_archive(
    path: &Path,
    record: &SdcardRecord,
    unit: ProgressUnit,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<()> {
    let entries = record.to_entries()?;
    let total = match unit {
        ProgressUnit::Entries => entries.len() as u64,
        ProgressUnit::Bytes => entries.iter().map(|(_, b)| b.len() as u64).sum(),
    };

    let tmp = temp_sibling(path);
    match write_entries(&tmp, &entries, unit, total, &mut progress) {
        Ok(()) => {
            if let Err(e) = fs::rename(&tmp, path) {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
            debug!(target: "etx_rs::archive", path = %path.display(), members = entries.len(), "wrote archive");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Serialize a record to archive bytes in memory.
pub fn write_archive_bytes(record: &SdcardRecord) -> Result<Vec<u8>> {
    let entries = record.to_entries()?;
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.set_comment(tool_comment());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in &entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

fn write_entries(
    path: &Path,
    entries: &[(String, Vec<u8>)],
    unit: ProgressUnit,
    total: u64,
    progress: &mut Option<&mut ProgressFn<'_>>,
) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    zip.set_comment(tool_comment());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut done = 0u64;
    for (name, bytes) in entries {
        notify(progress, ProgressEvent { unit, done, total, current: Some(name) })?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
        done += match unit {
            ProgressUnit::Entries => 1,
            ProgressUnit::Bytes => bytes.len() as u64,
        };
    }
    zip.finish()?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "archive".into());
    name.push(".tmp");
    path.with_file_name(name)
}
