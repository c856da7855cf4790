//! SD card storage trees.
//!
//! Radios without internal EEPROM keep their settings as a directory tree
//! on the SD card, and archives mirror the same layout. Two generations
//! exist:
//!
//! * the YAML tree (v221): `RADIO/radio.yml`, one `MODELS/*.yml` per
//!   model, and `MODELS/labels.yml` carrying the label catalog and model
//!   order;
//! * the legacy tree (v219/v220): `RADIO/radio.bin` and `MODELS/*.bin`
//!   binary sections, with `RADIO/models.txt` grouping models into
//!   bracketed categories.
//!
//! This module is the codec for both: tree <-> entries <-> directory.
//! Interpretation (value clamping, category-to-label mapping) happens in
//! the conversion pipeline, which consumes the [`SdcardRecord`] this
//! module produces.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::boards::{BoardId, LayoutFamily, SettingsVersion};
use crate::document::{CanonicalDocument, FAVORITES_LABEL};
use crate::eeprom::{
    GeneralRecord, HEADER_LEN, ModelLayout, ModelRecord, decode_general_fields,
    decode_model_slot, decode_version, encode_general_fields, encode_model_slot, model_layout,
    read_u16, write_section_header,
};
use crate::error::{Error, Result};
use crate::progress::{ProgressEvent, ProgressFn, ProgressUnit, notify};

pub const RADIO_DIR: &str = "RADIO";
pub const MODELS_DIR: &str = "MODELS";
pub const RADIO_YML: &str = "RADIO/radio.yml";
pub const RADIO_BIN: &str = "RADIO/radio.bin";
pub const MODELS_TXT: &str = "RADIO/models.txt";
pub const LABELS_YML: &str = "MODELS/labels.yml";

/// Category used for legacy model list entries that appear before any
/// bracketed header.
pub(crate) const DEFAULT_CATEGORY: &str = "Models";

// ---------------------------------------------------------------------------
// on-disk YAML schema
// ---------------------------------------------------------------------------

fn default_contrast() -> u8 {
    25
}
fn default_vbat_warn() -> u8 {
    65
}
fn default_backlight_delay() -> u8 {
    10
}
fn default_inactivity_timer() -> u8 {
    10
}
fn default_stick_mode() -> u8 {
    1
}

/// `RADIO/radio.yml`. Unknown keys from newer firmware are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioYaml {
    pub version: u8,
    pub board: String,
    #[serde(default = "default_contrast")]
    pub contrast: u8,
    #[serde(default = "default_vbat_warn")]
    pub vbat_warn: u8,
    #[serde(default)]
    pub beep_mode: i8,
    #[serde(default = "default_backlight_delay")]
    pub backlight_delay: u8,
    #[serde(default = "default_inactivity_timer")]
    pub inactivity_timer: u8,
    #[serde(default = "default_stick_mode")]
    pub stick_mode: u8,
    /// Filename of the current model, e.g. `model01.yml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_callsign: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_registration_id: String,
}

/// One `MODELS/*.yml` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelYaml {
    pub name: String,
    #[serde(default)]
    pub model_id: u8,
    #[serde(default)]
    pub extended_limits: bool,
    #[serde(default)]
    pub extended_trims: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<TimerYaml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub curves: Vec<CurveYaml>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerYaml {
    #[serde(default)]
    pub value: u32,
    /// Textual switch reference (`SA0`, `!SC2`), empty for none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub switch: String,
    #[serde(default)]
    pub countdown: bool,
    #[serde(default)]
    pub persistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurveYaml {
    #[serde(default)]
    pub smooth: bool,
    pub points: Vec<[i8; 2]>,
}

/// `MODELS/labels.yml`: label catalog plus model file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LabelsYaml {
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    models: Vec<String>,
}

// ---------------------------------------------------------------------------
// trees
// ---------------------------------------------------------------------------

/// A parsed YAML storage tree.
#[derive(Debug, Clone, PartialEq)]
pub struct YamlTree {
    pub board: BoardId,
    pub radio: RadioYaml,
    /// Model files in slot order.
    pub models: Vec<ModelFile>,
    /// Label catalog, as listed in `labels.yml`.
    pub labels: Vec<String>,
}

/// One model file within a YAML tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub filename: String,
    pub model: ModelYaml,
}

/// A parsed legacy binary storage tree.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyTree {
    pub board: BoardId,
    pub version: SettingsVersion,
    pub general: GeneralRecord,
    /// Model files in list order.
    pub models: Vec<(String, ModelRecord)>,
    /// Bracketed categories from `models.txt`, in file order.
    pub categories: Vec<(String, Vec<String>)>,
}

/// A decoded SD card tree of either generation.
#[derive(Debug, Clone, PartialEq)]
pub enum SdcardRecord {
    Yaml(YamlTree),
    Legacy(LegacyTree),
}

impl SdcardRecord {
    pub fn board(&self) -> BoardId {
        match self {
            SdcardRecord::Yaml(tree) => tree.board,
            SdcardRecord::Legacy(tree) => tree.board,
        }
    }

    pub fn version(&self) -> SettingsVersion {
        match self {
            SdcardRecord::Yaml(_) => SettingsVersion::V221,
            SdcardRecord::Legacy(tree) => tree.version,
        }
    }

    /// Serialize to named entries, the common currency of directory and
    /// archive writers.
    pub fn to_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        match self {
            SdcardRecord::Yaml(tree) => tree.to_entries(),
            SdcardRecord::Legacy(tree) => tree.to_entries(),
        }
    }

    /// Parse named entries back into a record. The flavor is chosen by
    /// which radio settings entry is present.
    pub fn from_entries(entries: &[(String, Vec<u8>)]) -> Result<SdcardRecord> {
        let find = |name: &str| entries.iter().find(|(n, _)| n == name).map(|(_, b)| b.as_slice());
        if let Some(bytes) = find(RADIO_YML) {
            YamlTree::from_entries(bytes, entries).map(SdcardRecord::Yaml)
        } else if let Some(bytes) = find(RADIO_BIN) {
            LegacyTree::from_entries(bytes, entries).map(SdcardRecord::Legacy)
        } else {
            Err(Error::MissingRequiredEntry { name: format!("{RADIO_YML} or {RADIO_BIN}") })
        }
    }
}

/// Stable model filename for a slot, 1-based on disk.
pub(crate) fn model_filename(slot: usize, ext: &str) -> String {
    format!("model{:02}.{ext}", slot + 1)
}

/// Section layout used for legacy binary files. Boards with a flat image
/// reuse their image layout; colour boards use the wide layout.
pub(crate) fn section_layout(board: BoardId) -> &'static ModelLayout {
    match board.spec().geometry {
        Some(geometry) => model_layout(geometry.family),
        None => model_layout(LayoutFamily::Taranis),
    }
}

pub(crate) fn section_general_len(board: BoardId) -> usize {
    match board.spec().geometry {
        Some(geometry) => geometry.general_size,
        None => 128,
    }
}

pub(crate) fn section_model_len(board: BoardId) -> usize {
    match board.spec().geometry {
        Some(geometry) => geometry.model_stride,
        None => 512,
    }
}

impl YamlTree {
    /// Build the YAML tree a document saves as. The document must already
    /// fit the board; this is a mapping, not a conversion.
    pub fn from_document(doc: &CanonicalDocument) -> YamlTree {
        let models: Vec<ModelFile> = doc
            .models
            .iter()
            .map(|(slot, m)| ModelFile {
                filename: model_filename(slot, "yml"),
                model: ModelYaml {
                    name: m.name.clone(),
                    model_id: m.model_id,
                    extended_limits: m.extended_limits,
                    extended_trims: m.extended_trims,
                    timers: m
                        .timers
                        .iter()
                        .map(|t| TimerYaml {
                            value: t.seconds,
                            switch: t.switch.to_string(),
                            countdown: t.countdown,
                            persistent: t.persistent,
                        })
                        .collect(),
                    curves: m
                        .curves
                        .iter()
                        .map(|c| CurveYaml {
                            smooth: c.smooth,
                            points: c.points.iter().map(|p| [p.x, p.y]).collect(),
                        })
                        .collect(),
                    labels: m.labels.clone(),
                },
            })
            .collect();

        let current_model = doc
            .models
            .get(usize::from(doc.radio.current_model))
            .map(|_| model_filename(usize::from(doc.radio.current_model), "yml"));

        let labels = doc.labels();

        let radio = RadioYaml {
            version: SettingsVersion::V221.to_u8(),
            board: doc.board.spec().yaml_name.to_string(),
            contrast: doc.radio.contrast,
            vbat_warn: doc.radio.vbat_warn,
            beep_mode: doc.radio.beep_mode,
            backlight_delay: doc.radio.backlight_delay,
            inactivity_timer: doc.radio.inactivity_timer,
            stick_mode: doc.radio.stick_mode,
            current_model,
            owner_callsign: doc.radio.owner_callsign.clone(),
            owner_registration_id: doc.radio.owner_registration_id.clone(),
        };

        YamlTree { board: doc.board, radio, models, labels }
    }

    fn to_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::with_capacity(self.models.len() + 2);
        entries.push((RADIO_YML.to_string(), serde_yaml::to_string(&self.radio)?.into_bytes()));

        let mut labels = self.labels.clone();
        if !labels.iter().any(|l| l == FAVORITES_LABEL) {
            labels.insert(0, FAVORITES_LABEL.to_string());
        }
        let index = LabelsYaml {
            labels,
            models: self.models.iter().map(|m| m.filename.clone()).collect(),
        };
        entries.push((LABELS_YML.to_string(), serde_yaml::to_string(&index)?.into_bytes()));

        for file in &self.models {
            entries.push((
                format!("{MODELS_DIR}/{}", file.filename),
                serde_yaml::to_string(&file.model)?.into_bytes(),
            ));
        }
        Ok(entries)
    }

    fn from_entries(radio_bytes: &[u8], entries: &[(String, Vec<u8>)]) -> Result<YamlTree> {
        let radio: RadioYaml = parse_yaml(RADIO_YML, radio_bytes)?;

        let board = BoardId::from_name(&radio.board)
            .ok_or_else(|| Error::UnknownBoard { name: radio.board.clone() })?;
        if SettingsVersion::from_u8(radio.version) != Some(SettingsVersion::V221) {
            return Err(Error::UnknownVersion { version: radio.version });
        }

        let index: LabelsYaml = match entries.iter().find(|(n, _)| n == LABELS_YML) {
            Some((_, bytes)) => parse_yaml(LABELS_YML, bytes)?,
            None => LabelsYaml::default(),
        };

        // model files: listed order first, stragglers appended sorted
        let mut available: Vec<&(String, Vec<u8>)> = entries
            .iter()
            .filter(|(name, _)| {
                name.starts_with("MODELS/") && name.ends_with(".yml") && name != LABELS_YML
            })
            .collect();
        available.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ordered: Vec<(String, &[u8])> = Vec::with_capacity(available.len());
        for filename in &index.models {
            let full = format!("{MODELS_DIR}/{filename}");
            if let Some(pos) = available.iter().position(|(n, _)| *n == full) {
                let (name, bytes) = available.remove(pos);
                ordered.push((name.clone(), bytes));
            }
        }
        for (name, bytes) in available {
            ordered.push((name.clone(), bytes));
        }

        let mut models = Vec::with_capacity(ordered.len());
        for (name, bytes) in ordered {
            let model: ModelYaml = parse_yaml(&name, bytes)?;
            let filename = name.trim_start_matches("MODELS/").to_string();
            models.push(ModelFile { filename, model });
        }

        Ok(YamlTree { board, radio, models, labels: index.labels })
    }
}

impl LegacyTree {
    /// Build the legacy tree a document saves as. Only the v219/v220
    /// generation stores this shape; each model's first label becomes its
    /// category.
    pub fn from_document(doc: &CanonicalDocument) -> Result<LegacyTree> {
        if doc.version < SettingsVersion::V219 || doc.version == SettingsVersion::V221 {
            return Err(Error::IncompatibleTarget {
                board: doc.board,
                version: doc.version,
                target: "legacy SD card tree",
            });
        }

        let mut models = Vec::new();
        let mut categories: Vec<(String, Vec<String>)> = Vec::new();
        for (slot, model) in doc.models.iter() {
            let filename = model_filename(slot, "bin");
            let category =
                model.labels.first().map(String::as_str).unwrap_or(DEFAULT_CATEGORY);
            match categories.iter_mut().find(|(name, _)| name == category) {
                Some((_, files)) => files.push(filename.clone()),
                None => categories.push((category.to_string(), vec![filename.clone()])),
            }
            models.push((filename, crate::convert::record_from_model(model)));
        }

        Ok(LegacyTree {
            board: doc.board,
            version: doc.version,
            general: crate::convert::general_from_radio(&doc.radio, doc.version),
            models,
            categories,
        })
    }

    fn to_entries(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::with_capacity(self.models.len() + 2);

        let mut radio = vec![0u8; section_general_len(self.board)];
        write_section_header(&mut radio, self.version, self.board.spec().variant);
        encode_general_fields(&mut radio, &self.general, self.version).map_err(|id| {
            Error::FieldOutOfRange {
                field: id.to_string(),
                value: self.general.get(id).map(|v| v.to_string()).unwrap_or_default(),
                board: self.board,
                version: self.version,
            }
        })?;
        entries.push((RADIO_BIN.to_string(), radio));
        entries.push((MODELS_TXT.to_string(), write_models_txt(&self.categories).into_bytes()));

        let layout = section_layout(self.board);
        for (filename, record) in &self.models {
            let mut slot = vec![0u8; section_model_len(self.board)];
            encode_model_slot(&mut slot, layout, record).map_err(|field| {
                Error::FieldOutOfRange {
                    field: format!("{filename} {field}"),
                    value: record.name.clone(),
                    board: self.board,
                    version: self.version,
                }
            })?;
            entries.push((format!("{MODELS_DIR}/{filename}"), slot));
        }
        Ok(entries)
    }

    fn from_entries(radio_bytes: &[u8], entries: &[(String, Vec<u8>)]) -> Result<LegacyTree> {
        if radio_bytes.len() < HEADER_LEN {
            return Err(Error::CorruptFilesystem {
                detail: format!("{RADIO_BIN} is shorter than its header"),
            });
        }
        let version = decode_version(radio_bytes[0])?;
        if version == SettingsVersion::V221 {
            return Err(Error::CorruptFilesystem {
                detail: format!("{RADIO_BIN} carries the YAML storage version"),
            });
        }
        let variant = read_u16(radio_bytes, 1);
        let board = BoardId::from_variant(variant)
            .ok_or_else(|| Error::UnknownBoard { name: format!("variant {variant:#06x}") })?;

        let expected = section_general_len(board);
        if radio_bytes.len() != expected {
            return Err(Error::SizeMismatch {
                actual: radio_bytes.len(),
                expected,
                detail: format!("{RADIO_BIN} for {board}"),
            });
        }
        let general = decode_general_fields(radio_bytes, version);

        let categories = entries
            .iter()
            .find(|(n, _)| n == MODELS_TXT || n == "MODELS/models.txt")
            .map(|(_, bytes)| parse_models_txt(&String::from_utf8_lossy(bytes)))
            .unwrap_or_default();

        let mut files: Vec<&(String, Vec<u8>)> = entries
            .iter()
            .filter(|(name, _)| name.starts_with("MODELS/") && name.ends_with(".bin"))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let layout = section_layout(board);
        let model_len = section_model_len(board);
        let mut models = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            if bytes.len() != model_len {
                return Err(Error::CorruptFilesystem {
                    detail: format!("{name}: expected {model_len} bytes, got {}", bytes.len()),
                });
            }
            if let Some(record) = decode_model_slot(bytes, layout) {
                models.push((name.trim_start_matches("MODELS/").to_string(), record));
            }
        }

        Ok(LegacyTree { board, version, general, models, categories })
    }
}

fn parse_yaml<T: for<'de> Deserialize<'de>>(name: &str, bytes: &[u8]) -> Result<T> {
    let text = core::str::from_utf8(bytes).map_err(|_| Error::CorruptFilesystem {
        detail: format!("{name} is not valid UTF-8"),
    })?;
    serde_yaml::from_str(text)
        .map_err(|e| Error::CorruptFilesystem { detail: format!("{name}: {e}") })
}

// ---------------------------------------------------------------------------
// models.txt
// ---------------------------------------------------------------------------

/// Parse the bracketed category list. Files before the first header fall
/// into the default category.
pub(crate) fn parse_models_txt(text: &str) -> Vec<(String, Vec<String>)> {
    let mut categories: Vec<(String, Vec<String>)> = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            categories.push((name.to_string(), Vec::new()));
        } else {
            match categories.last_mut() {
                Some((_, files)) => files.push(line.to_string()),
                None => categories.push((DEFAULT_CATEGORY.to_string(), vec![line.to_string()])),
            }
        }
    }
    categories
}

pub(crate) fn write_models_txt(categories: &[(String, Vec<String>)]) -> String {
    let mut out = String::new();
    for (name, files) in categories {
        out.push('[');
        out.push_str(name);
        out.push_str("]\n");
        for file in files {
            out.push_str(file);
            out.push('\n');
        }
    }
    out
}

// ---------------------------------------------------------------------------
// directory I/O
// ---------------------------------------------------------------------------

/// Does `path` look like a storage directory?
pub fn is_storage_dir(path: &Path) -> bool {
    path.join(RADIO_YML).is_file() || path.join(RADIO_BIN).is_file()
}

/// List the model files under `MODELS/`, sorted by name. A missing
/// `MODELS/` directory lists as empty; an unreadable one is
/// [`Error::CannotListFiles`].
pub fn list_model_files(path: &Path) -> Result<Vec<String>> {
    let models_dir = path.join(MODELS_DIR);
    if !models_dir.is_dir() {
        return Ok(Vec::new());
    }
    let listing = fs::read_dir(&models_dir)
        .map_err(|_| Error::CannotListFiles { path: models_dir.display().to_string() })?;
    let mut names: Vec<String> = Vec::new();
    for entry in listing {
        let entry = entry
            .map_err(|_| Error::CannotListFiles { path: models_dir.display().to_string() })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".yml") || name.ends_with(".bin") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Delete the named model files under `MODELS/`. Names already absent are
/// skipped; a file that cannot be removed is [`Error::ErrorDeletingFiles`].
pub fn delete_model_files(path: &Path, names: &[String]) -> Result<()> {
    let models_dir = path.join(MODELS_DIR);
    for name in names {
        let file = models_dir.join(name);
        if file.is_file() {
            fs::remove_file(&file)
                .map_err(|_| Error::ErrorDeletingFiles { path: file.display().to_string() })?;
        }
    }
    Ok(())
}

/// Read a storage directory into a record.
pub fn read_dir(path: &Path, mut progress: Option<&mut ProgressFn<'_>>) -> Result<SdcardRecord> {
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();

    for name in [RADIO_YML, RADIO_BIN, MODELS_TXT, "MODELS/models.txt"] {
        let file = path.join(name);
        if file.is_file() {
            entries.push((name.to_string(), fs::read(&file)?));
        }
    }

    let models_dir = path.join(MODELS_DIR);
    let names = list_model_files(path)?;
    let total = names.len() as u64;
    for (done, name) in names.iter().enumerate() {
        notify(
            &mut progress,
            ProgressEvent {
                unit: ProgressUnit::Entries,
                done: done as u64,
                total,
                current: Some(name),
            },
        )?;
        entries.push((format!("{MODELS_DIR}/{name}"), fs::read(models_dir.join(name))?));
    }

    debug!(target: "etx_rs::sdcard", path = %path.display(), entries = entries.len(), "read storage directory");
    SdcardRecord::from_entries(&entries)
}

/// Write a record as a storage directory.
///
/// Each file is written to a temporary sibling and renamed into place.
/// Model files from a previous save that are no longer part of the record
/// are removed, as is the other generation's radio file.
pub fn write_dir(
    path: &Path,
    record: &SdcardRecord,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<()> {
    let entries = record.to_entries()?;

    fs::create_dir_all(path.join(RADIO_DIR))?;
    fs::create_dir_all(path.join(MODELS_DIR))?;

    remove_stale_models(path, &entries)?;
    let stale_radio = match record {
        SdcardRecord::Yaml(_) => path.join(RADIO_BIN),
        SdcardRecord::Legacy(_) => path.join(RADIO_YML),
    };
    if stale_radio.is_file() {
        fs::remove_file(&stale_radio).map_err(|_| Error::ErrorDeletingFiles {
            path: stale_radio.display().to_string(),
        })?;
    }

    let total = entries.len() as u64;
    for (done, (name, bytes)) in entries.iter().enumerate() {
        notify(
            &mut progress,
            ProgressEvent {
                unit: ProgressUnit::Entries,
                done: done as u64,
                total,
                current: Some(name),
            },
        )?;
        let target = path.join(name);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
    }

    debug!(target: "etx_rs::sdcard", path = %path.display(), entries = entries.len(), "wrote storage directory");
    Ok(())
}

/// Delete model files a new save no longer contains.
fn remove_stale_models(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<()> {
    let stale: Vec<String> = list_model_files(path)?
        .into_iter()
        .filter(|name| {
            let full = format!("{MODELS_DIR}/{name}");
            !entries.iter().any(|(n, _)| *n == full)
        })
        .collect();
    delete_model_files(path, &stale)
}
