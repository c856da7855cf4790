//! Conversion pipeline.
//!
//! Sits between the codecs and the canonical document. `normalize` lifts a
//! decoded raw record into a [`CanonicalDocument`], repairing invalid
//! values as it goes; `convert` walks a document along the version ladder
//! under a [`RuleTable`]; `denormalize` turns a document back into the raw
//! record a target board and version can store. All three report every
//! change through a [`ConversionLog`]; none of them ever changes data
//! silently.

pub mod log;
pub mod rules;

pub use log::{ConversionLog, LogEntry, Severity};
pub use rules::{RuleKey, RuleTable, StepAction, VersionStep, VersionTraits, version_traits};

use crate::boards::{BoardId, SettingsVersion};
use crate::document::{
    CanonicalDocument, Curve, CurvePoint, ModelData, ModelSlots, RadioSettings, SwitchRef, Timer,
};
use crate::eeprom::{
    CURVE_MAX_POINTS, EepromImage, FieldId, FieldSpec, GeneralRecord, ModelRecord, RawCurve,
    RawTimer, RawValue, GENERAL_FIELDS, general_field,
};
use crate::error::{Error, Result};
use crate::sdcard::{LegacyTree, SdcardRecord, YamlTree, section_layout};

use rules::ladder_path;

/// Curve slots per model, across all storage forms.
pub(crate) const MAX_CURVES: usize = 8;

/// A decoded storage payload, before normalization. One variant per
/// on-disk shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Flat EEPROM image (raw binary or HEX transport).
    Eeprom(EepromImage),
    /// SD card tree (YAML or legacy binary sections).
    Sdcard(SdcardRecord),
}

impl RawRecord {
    pub fn board(&self) -> BoardId {
        match self {
            RawRecord::Eeprom(image) => image.board,
            RawRecord::Sdcard(record) => record.board(),
        }
    }

    pub fn version(&self) -> SettingsVersion {
        match self {
            RawRecord::Eeprom(image) => image.version,
            RawRecord::Sdcard(record) => record.version(),
        }
    }
}

/// The conversion pipeline. Stateless apart from its rule table; one
/// instance can serve any number of documents.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    table: RuleTable,
}

impl Pipeline {
    /// Pipeline with the standard rule table.
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    /// Pipeline with a caller-supplied (already validated) rule table.
    pub fn with_table(table: RuleTable) -> Pipeline {
        Pipeline { table }
    }

    /// Lift a raw record into a canonical document at the record's own
    /// board and version. Out of range source values are repaired and
    /// logged with [`Severity::Invalid`]; structure is taken as decoded.
    pub fn normalize(&self, raw: &RawRecord) -> (CanonicalDocument, ConversionLog) {
        let mut log = ConversionLog::new();
        log.set_origin(raw.board(), raw.version());
        let doc = match raw {
            RawRecord::Eeprom(image) => normalize_eeprom(image, &mut log),
            RawRecord::Sdcard(SdcardRecord::Yaml(tree)) => normalize_yaml(tree, &mut log),
            RawRecord::Sdcard(SdcardRecord::Legacy(tree)) => normalize_legacy(tree, &mut log),
        };
        (doc, log)
    }

    /// Convert a document to `target`, walking the version ladder one edge
    /// at a time. Converting to the document's own version is the identity
    /// and produces an empty log.
    pub fn convert(
        &self,
        doc: &CanonicalDocument,
        target: SettingsVersion,
    ) -> Result<(CanonicalDocument, ConversionLog)> {
        let mut log = ConversionLog::new();
        log.set_origin(doc.board, doc.version);
        let mut out = doc.clone();
        for (from, to) in ladder_path(doc.version, target) {
            let step = self
                .table
                .step_for(out.board, from, to)
                .ok_or_else(|| Error::InvalidRuleTable {
                    detail: format!("no step for {from} -> {to}"),
                })?
                .clone();
            log.set_component("Storage");
            log.push(
                Severity::Convert,
                "version",
                "",
                from.to_string(),
                "converted",
                to.to_string(),
            );
            for action in &step.actions {
                apply_action(&mut out, *action, &mut log);
            }
            out.version = to;
        }
        Ok((out, log))
    }

    /// Convert to a different board and version in one pass. The version
    /// walk runs first, then the document is fitted to the target board's
    /// capacities.
    pub fn retarget(
        &self,
        doc: &CanonicalDocument,
        board: BoardId,
        version: SettingsVersion,
    ) -> Result<(CanonicalDocument, ConversionLog)> {
        let (mut out, mut log) = self.convert(doc, version)?;
        if out.board != board {
            log.set_component("Storage");
            log.converted("board", "", out.board.to_string(), "retargeted", board.to_string());
            fit_to_board(&mut out, board, &mut log);
            out.board = board;
        }
        Ok((out, log))
    }

    /// Turn a document into the raw record `board` at `version` stores,
    /// converting and retargeting first when needed.
    pub fn denormalize(
        &self,
        doc: &CanonicalDocument,
        board: BoardId,
        version: SettingsVersion,
    ) -> Result<(RawRecord, ConversionLog)> {
        let (fitted, mut log) = self.retarget(doc, board, version)?;
        let record = if version == SettingsVersion::V221 || board.spec().is_sdcard() {
            RawRecord::Sdcard(tree_record(&fitted, &mut log)?)
        } else {
            RawRecord::Eeprom(eeprom_record(&fitted, &mut log)?)
        };
        Ok((record, log))
    }

    /// Like [`denormalize`](Pipeline::denormalize), but always produce the
    /// tree shape, which is what archives and storage directories carry
    /// even for boards whose native storage is a flat image.
    pub fn denormalize_tree(
        &self,
        doc: &CanonicalDocument,
        board: BoardId,
        version: SettingsVersion,
    ) -> Result<(SdcardRecord, ConversionLog)> {
        let (fitted, mut log) = self.retarget(doc, board, version)?;
        let record = tree_record(&fitted, &mut log)?;
        Ok((record, log))
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }
}

// ---------------------------------------------------------------------------
// normalization
// ---------------------------------------------------------------------------

fn model_component(slot: usize, name: &str) -> String {
    if name.is_empty() {
        format!("Model {:02}", slot + 1)
    } else {
        format!("Model {:02} ({name})", slot + 1)
    }
}

/// Clamp `value` into `lo..=hi`, logging a repair when it was outside.
fn clamp_logged(
    log: &mut ConversionLog,
    field: &str,
    kind: &str,
    value: i64,
    lo: i64,
    hi: i64,
) -> i64 {
    if value < lo || value > hi {
        let clamped = value.clamp(lo, hi);
        log.invalid(field, kind, value.to_string(), "clamped", clamped.to_string());
        clamped
    } else {
        value
    }
}

/// Declared range for a general field, with the board-dependent override
/// for the current model index.
fn field_range(spec: &FieldSpec, board: BoardId) -> (i64, i64) {
    if spec.id == FieldId::CurrentModel {
        (0, board.spec().max_models as i64 - 1)
    } else {
        (spec.min, spec.max)
    }
}

fn radio_from_general(
    general: &GeneralRecord,
    board: BoardId,
    version: SettingsVersion,
    log: &mut ConversionLog,
) -> RadioSettings {
    log.set_component("Radio");
    let mut radio = RadioSettings::default();
    for spec in GENERAL_FIELDS {
        if spec.since > version {
            continue;
        }
        match spec.id {
            FieldId::OwnerCallsign => {
                radio.owner_callsign = general.text(spec.id).unwrap_or_default().to_string();
            }
            FieldId::OwnerRegistrationId => {
                radio.owner_registration_id =
                    general.text(spec.id).unwrap_or_default().to_string();
            }
            _ => {
                let raw = general.int(spec.id).unwrap_or(0);
                let (lo, hi) = field_range(spec, board);
                let value = clamp_logged(log, spec.id.as_str(), "", raw, lo, hi);
                match spec.id {
                    FieldId::Contrast => radio.contrast = value as u8,
                    FieldId::VbatWarn => radio.vbat_warn = value as u8,
                    FieldId::BeepMode => radio.beep_mode = value as i8,
                    FieldId::BacklightDelay => radio.backlight_delay = value as u8,
                    FieldId::InactivityTimer => radio.inactivity_timer = value as u8,
                    FieldId::StickMode => radio.stick_mode = value as u8,
                    FieldId::CurrentModel => radio.current_model = value as u8,
                    FieldId::OwnerCallsign | FieldId::OwnerRegistrationId => {}
                }
            }
        }
    }
    radio
}

fn normalize_switch(
    raw: SwitchRef,
    board: BoardId,
    log: &mut ConversionLog,
    field: &str,
) -> SwitchRef {
    match raw.switch_index() {
        Some(index) if usize::from(index) >= board.spec().switches => {
            log.invalid(field, "switch", raw.to_string(), "no such switch, cleared", "");
            SwitchRef::None
        }
        _ => raw,
    }
}

fn normalize_curve(
    points: Vec<CurvePoint>,
    smooth: bool,
    cap: usize,
    log: &mut ConversionLog,
) -> Option<Curve> {
    if points.is_empty() {
        // unused slot, nothing to report
        return None;
    }
    if points.len() < 2 {
        log.invalid("points", "count", points.len().to_string(), "degenerate curve, dropped", "");
        return None;
    }
    let points = if points.len() > cap {
        let thinned = thin_points(&points, cap);
        log.invalid(
            "points",
            "count",
            points.len().to_string(),
            "thinned",
            thinned.len().to_string(),
        );
        thinned
    } else {
        points
    };
    Some(Curve { smooth, points })
}

fn model_from_record(
    slot: usize,
    record: &ModelRecord,
    board: BoardId,
    version: SettingsVersion,
    log: &mut ConversionLog,
) -> ModelData {
    let traits = version_traits(version);
    log.set_component(model_component(slot, &record.name));

    let model_id = clamp_logged(log, "model_id", "", i64::from(record.model_id), 0, 63) as u8;

    let mut extended_limits = record.extended_limits;
    let mut extended_trims = record.extended_trims;
    if !traits.has_extended_flags && (extended_limits || extended_trims) {
        log.invalid("flags", "", "extended", "not present in this version, cleared", "");
        extended_limits = false;
        extended_trims = false;
    }

    let mut timers = Vec::new();
    for (i, raw) in record.timers.iter().enumerate() {
        log.set_sub_component(format!("Timer {}", i + 1));
        if i >= traits.timer_count {
            if *raw != RawTimer::default() {
                log.invalid("timer", "", raw.value.to_string(), "beyond timer count, dropped", "");
            }
            continue;
        }
        let seconds = clamp_logged(
            log,
            "value",
            "seconds",
            i64::from(raw.value),
            0,
            i64::from(traits.timer_seconds_max),
        ) as u32;
        let switch = match SwitchRef::from_raw(raw.switch) {
            Some(parsed) => normalize_switch(parsed, board, log, "switch"),
            None => {
                log.invalid("switch", "", raw.switch.to_string(), "unparseable, cleared", "");
                SwitchRef::None
            }
        };
        timers.push(Timer { seconds, switch, countdown: raw.countdown, persistent: raw.persistent });
        log.set_component(model_component(slot, &record.name));
    }

    let curve_cap = traits.curve_points_max.min(board.spec().max_curve_points);
    let mut curves = Vec::new();
    for (i, raw) in record.curves.iter().enumerate() {
        log.set_sub_component(format!("Curve {}", i + 1));
        let points = raw.points.iter().map(|&(x, y)| CurvePoint { x, y }).collect();
        if let Some(curve) = normalize_curve(points, raw.smooth, curve_cap, log) {
            curves.push(curve);
        }
    }
    log.set_component(model_component(slot, &record.name));

    ModelData {
        name: record.name.clone(),
        model_id,
        extended_limits,
        extended_trims,
        timers,
        curves,
        labels: Vec::new(),
    }
}

fn normalize_eeprom(image: &EepromImage, log: &mut ConversionLog) -> CanonicalDocument {
    let board = image.board;
    let version = image.version;
    let radio = radio_from_general(&image.general, board, version, log);

    let mut models = ModelSlots::with_capacity(board.spec().max_models);
    for (slot, record) in image.models.iter().enumerate() {
        if let Some(record) = record {
            models.set(slot, Some(model_from_record(slot, record, board, version, log)));
        }
    }

    CanonicalDocument { board, version, radio, models }
}

fn normalize_yaml(tree: &YamlTree, log: &mut ConversionLog) -> CanonicalDocument {
    let board = tree.board;
    let version = SettingsVersion::V221;
    let traits = version_traits(version);
    let spec = board.spec();

    log.set_component("Radio");
    let range = |id: FieldId| match general_field(id) {
        Some(spec) => (spec.min, spec.max),
        None => (i64::MIN, i64::MAX),
    };
    let r = &tree.radio;
    let (lo, hi) = range(FieldId::Contrast);
    let contrast = clamp_logged(log, "contrast", "", i64::from(r.contrast), lo, hi) as u8;
    let (lo, hi) = range(FieldId::VbatWarn);
    let vbat_warn = clamp_logged(log, "vbat_warn", "", i64::from(r.vbat_warn), lo, hi) as u8;
    let (lo, hi) = range(FieldId::BeepMode);
    let beep_mode = clamp_logged(log, "beep_mode", "", i64::from(r.beep_mode), lo, hi) as i8;
    let (lo, hi) = range(FieldId::BacklightDelay);
    let backlight_delay =
        clamp_logged(log, "backlight_delay", "", i64::from(r.backlight_delay), lo, hi) as u8;
    let (lo, hi) = range(FieldId::InactivityTimer);
    let inactivity_timer =
        clamp_logged(log, "inactivity_timer", "", i64::from(r.inactivity_timer), lo, hi) as u8;
    let (lo, hi) = range(FieldId::StickMode);
    let stick_mode = clamp_logged(log, "stick_mode", "", i64::from(r.stick_mode), lo, hi) as u8;

    let current_model = match &r.current_model {
        Some(filename) => match tree.models.iter().position(|m| &m.filename == filename) {
            Some(slot) => slot.min(spec.max_models - 1) as u8,
            None => {
                log.invalid("current_model", "", filename.clone(), "no such model file, reset", "0");
                0
            }
        },
        None => 0,
    };

    let radio = RadioSettings {
        contrast,
        vbat_warn,
        beep_mode,
        backlight_delay,
        inactivity_timer,
        stick_mode,
        current_model,
        owner_callsign: r.owner_callsign.clone(),
        owner_registration_id: r.owner_registration_id.clone(),
    };

    let mut models = ModelSlots::with_capacity(spec.max_models);
    for (slot, file) in tree.models.iter().enumerate() {
        let m = &file.model;
        log.set_component(model_component(slot, &m.name));
        if slot >= spec.max_models {
            log.push(
                Severity::Error,
                "model",
                "",
                file.filename.clone(),
                "no free slot on this board, dropped",
                "",
            );
            continue;
        }

        let mut name = m.name.clone();
        if name.chars().count() > spec.name_len {
            let truncated: String = name.chars().take(spec.name_len).collect();
            log.invalid("name", "", name.clone(), "truncated", truncated.clone());
            name = truncated;
        }

        let model_id = clamp_logged(log, "model_id", "", i64::from(m.model_id), 0, 63) as u8;

        let mut timers = Vec::new();
        for (i, t) in m.timers.iter().enumerate() {
            log.set_sub_component(format!("Timer {}", i + 1));
            if i >= traits.timer_count {
                log.invalid("timer", "", t.value.to_string(), "beyond timer count, dropped", "");
                continue;
            }
            let seconds = clamp_logged(
                log,
                "value",
                "seconds",
                i64::from(t.value),
                0,
                i64::from(traits.timer_seconds_max),
            ) as u32;
            let switch = match SwitchRef::parse(&t.switch) {
                Some(parsed) => normalize_switch(parsed, board, log, "switch"),
                None => {
                    log.invalid("switch", "", t.switch.clone(), "unparseable, cleared", "");
                    SwitchRef::None
                }
            };
            timers.push(Timer {
                seconds,
                switch,
                countdown: t.countdown,
                persistent: t.persistent,
            });
            log.set_component(model_component(slot, &name));
        }
        while timers.last() == Some(&Timer::default()) {
            timers.pop();
        }

        let curve_cap = traits.curve_points_max.min(spec.max_curve_points);
        let mut curves = Vec::new();
        for (i, c) in m.curves.iter().enumerate() {
            log.set_sub_component(format!("Curve {}", i + 1));
            if i >= MAX_CURVES {
                log.invalid("curve", "", format!("curve {}", i + 1), "beyond curve slots, dropped", "");
                continue;
            }
            let points = c.points.iter().map(|p| CurvePoint { x: p[0], y: p[1] }).collect();
            if let Some(curve) = normalize_curve(points, c.smooth, curve_cap, log) {
                curves.push(curve);
            }
        }
        log.set_component(model_component(slot, &name));

        let mut data = ModelData {
            name,
            model_id,
            extended_limits: m.extended_limits,
            extended_trims: m.extended_trims,
            timers,
            curves,
            labels: Vec::new(),
        };
        for label in &m.labels {
            data.add_label(label);
        }
        models.set(slot, Some(data));
    }

    CanonicalDocument { board, version, radio, models }
}

fn normalize_legacy(tree: &LegacyTree, log: &mut ConversionLog) -> CanonicalDocument {
    let board = tree.board;
    let version = tree.version;
    let spec = board.spec();
    let radio = radio_from_general(&tree.general, board, version, log);

    let mut models = ModelSlots::with_capacity(spec.max_models);
    for (slot, (filename, record)) in tree.models.iter().enumerate() {
        if slot >= spec.max_models {
            log.set_component(model_component(slot, &record.name));
            log.push(
                Severity::Error,
                "model",
                "",
                filename.clone(),
                "no free slot on this board, dropped",
                "",
            );
            continue;
        }
        models.set(slot, Some(model_from_record(slot, record, board, version, log)));
    }

    // legacy categories become labels on their member models
    for (category, files) in &tree.categories {
        for filename in files {
            match tree.models.iter().position(|(name, _)| name == filename) {
                Some(slot) => {
                    if let Some(model) = models.get_mut(slot) {
                        model.add_label(category);
                    }
                }
                None => {
                    log.set_component("Model list");
                    log.warning(
                        "category",
                        "",
                        format!("{category}: {filename}"),
                        "refers to a missing file, ignored",
                        "",
                    );
                }
            }
        }
    }

    CanonicalDocument { board, version, radio, models }
}

// ---------------------------------------------------------------------------
// denormalization
// ---------------------------------------------------------------------------

/// Build the flat image for an already fitted document. Labels have no
/// home in a flat image; losing them is logged here.
fn eeprom_record(fitted: &CanonicalDocument, log: &mut ConversionLog) -> Result<EepromImage> {
    for (slot, model) in fitted.models.iter() {
        if !model.labels.is_empty() {
            log.set_component(model_component(slot, &model.name));
            log.warning(
                "labels",
                "",
                model.labels.join(","),
                "not storable in a flat image, dropped",
                "",
            );
        }
    }
    let general = general_from_radio(&fitted.radio, fitted.version);
    let models = fitted
        .models
        .iter_all()
        .map(|(_, m)| m.map(record_from_model))
        .collect();
    EepromImage::from_records(fitted.board, fitted.version, general, models)
}

/// Build the tree record for an already fitted document: YAML for v221,
/// legacy binary sections with one category per model before that.
fn tree_record(fitted: &CanonicalDocument, log: &mut ConversionLog) -> Result<SdcardRecord> {
    if fitted.version == SettingsVersion::V221 {
        return Ok(SdcardRecord::Yaml(YamlTree::from_document(fitted)));
    }
    let mut fitted = fitted.clone();
    fit_to_section_layout(&mut fitted, log);
    for (slot, model) in fitted.models.iter() {
        if model.labels.len() > 1 {
            log.set_component(model_component(slot, &model.name));
            log.warning(
                "labels",
                "",
                model.labels.join(","),
                "collapsed to first label",
                model.labels[0].clone(),
            );
        }
    }
    Ok(SdcardRecord::Legacy(LegacyTree::from_document(&fitted)?))
}

/// Legacy binary sections share one fixed layout per family, whose caps
/// can be tighter than the board's own (colour boards allow longer names
/// and wider curves than the v219/v220 sections store). Clamp to the
/// section caps before encoding, logging each change.
fn fit_to_section_layout(doc: &mut CanonicalDocument, log: &mut ConversionLog) {
    let layout = section_layout(doc.board);
    let name_cap = layout.name_len;
    let timer_cap = layout.timer_offsets.len();
    let curve_cap = layout.curve_slots;

    for_each_model(doc, log, |model, log| {
        if model.name.chars().count() > name_cap {
            let truncated: String = model.name.chars().take(name_cap).collect();
            log.warning("name", "", model.name.clone(), "truncated", truncated.clone());
            model.name = truncated;
        }
        while model.timers.len() > timer_cap {
            let index = model.timers.len();
            let timer = model.timers.pop().unwrap_or_default();
            if timer != Timer::default() {
                log.set_sub_component(format!("Timer {index}"));
                log.warning(
                    "timer",
                    "seconds",
                    timer.seconds.to_string(),
                    "no timer slot in this storage shape, dropped",
                    "",
                );
            }
        }
        while model.curves.len() > curve_cap {
            log.set_sub_component(format!("Curve {}", model.curves.len()));
            log.warning("curve", "", "", "no curve slot in this storage shape, dropped", "");
            model.curves.pop();
        }
        for (i, curve) in model.curves.iter_mut().enumerate() {
            if curve.points.len() > CURVE_MAX_POINTS {
                log.set_sub_component(format!("Curve {}", i + 1));
                let thinned = thin_points(&curve.points, CURVE_MAX_POINTS);
                log.warning(
                    "points",
                    "count",
                    curve.points.len().to_string(),
                    "thinned",
                    thinned.len().to_string(),
                );
                curve.points = thinned;
            }
        }
    });
}

pub(crate) fn general_from_radio(radio: &RadioSettings, version: SettingsVersion) -> GeneralRecord {
    let mut general = GeneralRecord::default();
    general.set(FieldId::Contrast, RawValue::Int(i64::from(radio.contrast)));
    general.set(FieldId::VbatWarn, RawValue::Int(i64::from(radio.vbat_warn)));
    general.set(FieldId::BeepMode, RawValue::Int(i64::from(radio.beep_mode)));
    general.set(FieldId::BacklightDelay, RawValue::Int(i64::from(radio.backlight_delay)));
    general.set(FieldId::InactivityTimer, RawValue::Int(i64::from(radio.inactivity_timer)));
    general.set(FieldId::StickMode, RawValue::Int(i64::from(radio.stick_mode)));
    general.set(FieldId::CurrentModel, RawValue::Int(i64::from(radio.current_model)));
    if version_traits(version).has_owner {
        general.set(FieldId::OwnerCallsign, RawValue::Str(radio.owner_callsign.clone()));
        general.set(
            FieldId::OwnerRegistrationId,
            RawValue::Str(radio.owner_registration_id.clone()),
        );
    }
    general
}

pub(crate) fn record_from_model(model: &ModelData) -> ModelRecord {
    ModelRecord {
        name: model.name.clone(),
        model_id: model.model_id,
        extended_limits: model.extended_limits,
        extended_trims: model.extended_trims,
        timers: model
            .timers
            .iter()
            .map(|t| RawTimer {
                value: t.seconds,
                switch: t.switch.to_raw(),
                countdown: t.countdown,
                persistent: t.persistent,
            })
            .collect(),
        curves: model
            .curves
            .iter()
            .map(|c| RawCurve {
                smooth: c.smooth,
                points: c.points.iter().map(|p| (p.x, p.y)).collect(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// version steps and board fitting
// ---------------------------------------------------------------------------

fn apply_action(doc: &mut CanonicalDocument, action: StepAction, log: &mut ConversionLog) {
    match action {
        StepAction::ClampTimerSeconds { max } => {
            for_each_model(doc, log, |model, log| {
                for (i, timer) in model.timers.iter_mut().enumerate() {
                    if timer.seconds > max {
                        log.set_sub_component(format!("Timer {}", i + 1));
                        log.warning(
                            "value",
                            "seconds",
                            timer.seconds.to_string(),
                            "clamped",
                            max.to_string(),
                        );
                        timer.seconds = max;
                    }
                }
            });
        }
        StepAction::TruncateNames { max } => {
            for_each_model(doc, log, |model, log| {
                if model.name.chars().count() > max {
                    let truncated: String = model.name.chars().take(max).collect();
                    log.warning("name", "", model.name.clone(), "truncated", truncated.clone());
                    model.name = truncated;
                }
            });
        }
        StepAction::LimitTimers { keep } => {
            for_each_model(doc, log, |model, log| {
                while model.timers.len() > keep {
                    let index = model.timers.len();
                    let timer = model.timers.pop().unwrap_or_default();
                    if timer != Timer::default() {
                        log.set_sub_component(format!("Timer {index}"));
                        log.warning(
                            "timer",
                            "seconds",
                            timer.seconds.to_string(),
                            "not available in target version, dropped",
                            "",
                        );
                    }
                }
            });
        }
        StepAction::LimitCurvePoints { max } => {
            for_each_model(doc, log, |model, log| {
                for (i, curve) in model.curves.iter_mut().enumerate() {
                    if curve.points.len() > max {
                        log.set_sub_component(format!("Curve {}", i + 1));
                        let thinned = thin_points(&curve.points, max);
                        log.warning(
                            "points",
                            "count",
                            curve.points.len().to_string(),
                            "thinned",
                            thinned.len().to_string(),
                        );
                        curve.points = thinned;
                    }
                }
            });
        }
        StepAction::DropOwnerFields => {
            log.set_component("Radio");
            if !doc.radio.owner_callsign.is_empty() {
                log.warning(
                    "owner_callsign",
                    "",
                    doc.radio.owner_callsign.clone(),
                    "not available in target version, dropped",
                    "",
                );
            }
            if !doc.radio.owner_registration_id.is_empty() {
                log.warning(
                    "owner_registration_id",
                    "",
                    doc.radio.owner_registration_id.clone(),
                    "not available in target version, dropped",
                    "",
                );
            }
            doc.radio.owner_callsign.clear();
            doc.radio.owner_registration_id.clear();
        }
        StepAction::DropExtendedFlags => {
            for_each_model(doc, log, |model, log| {
                if model.extended_limits || model.extended_trims {
                    log.warning(
                        "flags",
                        "",
                        "extended",
                        "not available in target version, cleared",
                        "",
                    );
                    model.extended_limits = false;
                    model.extended_trims = false;
                }
            });
        }
        StepAction::CollapseLabels => {
            for_each_model(doc, log, |model, log| {
                if model.labels.len() > 1 {
                    let kept = model.labels[0].clone();
                    log.warning(
                        "labels",
                        "",
                        model.labels.join(","),
                        "collapsed to first label",
                        kept.clone(),
                    );
                    model.labels = vec![kept];
                }
            });
        }
    }
}

fn for_each_model<F>(doc: &mut CanonicalDocument, log: &mut ConversionLog, mut f: F)
where
    F: FnMut(&mut ModelData, &mut ConversionLog),
{
    let capacity = doc.models.capacity();
    for slot in 0..capacity {
        // read the name first so the scope label survives mutation
        let component = match doc.models.get(slot) {
            Some(model) => model_component(slot, &model.name),
            None => continue,
        };
        log.set_component(component);
        if let Some(model) = doc.models.get_mut(slot) {
            f(model, log);
        }
    }
}

/// Capacity pass when a document moves to another board.
fn fit_to_board(doc: &mut CanonicalDocument, board: BoardId, log: &mut ConversionLog) {
    let spec = board.spec();
    let timer_cap = board_timer_capacity(board);
    let curve_cap = board_curve_capacity(board);

    // models that no longer have a slot are lost, loudly
    if doc.models.capacity() > spec.max_models {
        for slot in spec.max_models..doc.models.capacity() {
            if let Some(model) = doc.models.get(slot) {
                log.set_component(model_component(slot, &model.name));
                log.push(
                    Severity::Error,
                    "model",
                    "",
                    model.name.clone(),
                    "no free slot on target board, dropped",
                    "",
                );
            }
        }
    }
    doc.models.resize(spec.max_models);

    for_each_model(doc, log, |model, log| {
        if model.name.chars().count() > spec.name_len {
            let truncated: String = model.name.chars().take(spec.name_len).collect();
            log.warning("name", "", model.name.clone(), "truncated", truncated.clone());
            model.name = truncated;
        }
        while model.timers.len() > timer_cap {
            let index = model.timers.len();
            let timer = model.timers.pop().unwrap_or_default();
            if timer != Timer::default() {
                log.set_sub_component(format!("Timer {index}"));
                log.warning(
                    "timer",
                    "seconds",
                    timer.seconds.to_string(),
                    "no timer slot on target board, dropped",
                    "",
                );
            }
        }
        for (i, timer) in model.timers.iter_mut().enumerate() {
            if let Some(index) = timer.switch.switch_index() {
                if usize::from(index) >= spec.switches {
                    log.set_sub_component(format!("Timer {}", i + 1));
                    log.warning(
                        "switch",
                        "",
                        timer.switch.to_string(),
                        "switch not present on target board, cleared",
                        "",
                    );
                    timer.switch = SwitchRef::None;
                }
            }
        }
        while model.curves.len() > curve_cap {
            log.set_sub_component(format!("Curve {}", model.curves.len()));
            log.warning("curve", "", "", "no curve slot on target board, dropped", "");
            model.curves.pop();
        }
        for (i, curve) in model.curves.iter_mut().enumerate() {
            if curve.points.len() > spec.max_curve_points {
                log.set_sub_component(format!("Curve {}", i + 1));
                let thinned = thin_points(&curve.points, spec.max_curve_points);
                log.warning(
                    "points",
                    "count",
                    curve.points.len().to_string(),
                    "thinned",
                    thinned.len().to_string(),
                );
                curve.points = thinned;
            }
        }
    });

    log.set_component("Radio");
    let max_model = spec.max_models as i64 - 1;
    let current = i64::from(doc.radio.current_model);
    if current > max_model {
        log.warning("current_model", "", current.to_string(), "clamped", max_model.to_string());
        doc.radio.current_model = max_model as u8;
    }
}

/// Timer slots a board can store.
pub(crate) fn board_timer_capacity(board: BoardId) -> usize {
    match board.spec().geometry {
        Some(geometry) => crate::eeprom::model_layout(geometry.family).timer_offsets.len(),
        None => 3,
    }
}

/// Curve slots a board can store.
pub(crate) fn board_curve_capacity(board: BoardId) -> usize {
    match board.spec().geometry {
        Some(geometry) => crate::eeprom::model_layout(geometry.family).curve_slots,
        None => MAX_CURVES,
    }
}

/// Reduce a point list to `max` points, keeping the endpoints and an even
/// spread of interior points.
fn thin_points(points: &[CurvePoint], max: usize) -> Vec<CurvePoint> {
    debug_assert!(max >= 2);
    if points.len() <= max {
        return points.to_vec();
    }
    let last = points.len() - 1;
    (0..max).map(|i| points[i * last / (max - 1)]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::BoardId;

    fn doc_with_model(model: ModelData) -> CanonicalDocument {
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);
        doc.models.set(0, Some(model));
        doc
    }

    #[test]
    fn convert_to_same_version_is_identity() {
        let doc = doc_with_model(ModelData::named("Cub"));
        let pipeline = Pipeline::new();
        let (out, log) = pipeline.convert(&doc, SettingsVersion::V219).unwrap();
        assert_eq!(out, doc);
        assert!(log.is_empty());
    }

    #[test]
    fn downgrade_drops_owner_fields_with_log() {
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);
        doc.radio.owner_callsign = "AB1CD".into();
        let pipeline = Pipeline::new();
        let (out, log) = pipeline.convert(&doc, SettingsVersion::V218).unwrap();
        assert_eq!(out.version, SettingsVersion::V218);
        assert!(out.radio.owner_callsign.is_empty());
        let dropped: Vec<_> = log
            .entries()
            .iter()
            .filter(|e| e.field == "owner_callsign" && e.severity == Severity::Warning)
            .collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].old_value, "AB1CD");
    }

    #[test]
    fn each_edge_logs_one_version_entry() {
        let doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V216);
        let pipeline = Pipeline::new();
        let (out, log) = pipeline.convert(&doc, SettingsVersion::V221).unwrap();
        assert_eq!(out.version, SettingsVersion::V221);
        let versions: Vec<_> = log
            .entries()
            .iter()
            .filter(|e| e.field == "version" && e.severity == Severity::Convert)
            .map(|e| (e.old_value.clone(), e.new_value.clone()))
            .collect();
        assert_eq!(
            versions,
            vec![
                ("v216".to_string(), "v218".to_string()),
                ("v218".to_string(), "v219".to_string()),
                ("v219".to_string(), "v220".to_string()),
                ("v220".to_string(), "v221".to_string()),
            ]
        );
    }

    #[test]
    fn downgrade_to_v216_truncates_and_limits() {
        let mut model = ModelData::named("LongModelName");
        model.extended_limits = true;
        model.timers = vec![
            Timer { seconds: 100, ..Timer::default() },
            Timer { seconds: 200, ..Timer::default() },
        ];
        model.curves = vec![Curve {
            smooth: false,
            points: (0..17)
                .map(|i| CurvePoint { x: (i * 12 - 100) as i8, y: 0 })
                .collect(),
        }];
        let mut doc = doc_with_model(model);
        doc.version = SettingsVersion::V218;

        let pipeline = Pipeline::new();
        let (out, log) = pipeline.convert(&doc, SettingsVersion::V216).unwrap();
        let model = out.models.get(0).unwrap();
        assert_eq!(model.name, "LongMode");
        assert_eq!(model.timers.len(), 1);
        assert!(!model.extended_limits);
        assert_eq!(model.curves[0].points.len(), 9);
        // endpoints survive thinning
        assert_eq!(model.curves[0].points[0].x, -100);
        assert_eq!(model.curves[0].points[8].x, 92);
        assert!(log.worst().unwrap() >= Severity::Warning);
    }

    #[test]
    fn upgrade_then_downgrade_restores_untouched_fields() {
        let mut model = ModelData::named("Cub");
        model.timers = vec![Timer { seconds: 300, countdown: true, ..Timer::default() }];
        let doc = doc_with_model(model);

        let pipeline = Pipeline::new();
        let (up, _) = pipeline.convert(&doc, SettingsVersion::V221).unwrap();
        let (back, _) = pipeline.convert(&up, SettingsVersion::V219).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn retarget_drops_overflow_models_with_error() {
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V218);
        for slot in 0..60 {
            doc.models.set(slot, Some(ModelData::named(format!("M{slot}"))));
        }
        let pipeline = Pipeline::new();
        let (out, log) = pipeline
            .retarget(&doc, BoardId::Stock9x, SettingsVersion::V216)
            .unwrap();
        assert_eq!(out.board, BoardId::Stock9x);
        assert_eq!(out.models.capacity(), 16);
        assert_eq!(out.models.used(), 16);
        let errors = log.entries().iter().filter(|e| e.severity == Severity::Error).count();
        assert_eq!(errors, 44);
    }

    #[test]
    fn retarget_clears_switches_the_target_lacks() {
        let mut model = ModelData::named("Cub");
        model.timers = vec![Timer {
            seconds: 60,
            // X9E switch index 10 does not exist on an X7 (6 switches)
            switch: SwitchRef::Switch {
                index: 10,
                position: crate::document::SwitchPosition::Up,
                inverted: false,
            },
            ..Timer::default()
        }];
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9e, SettingsVersion::V218);
        doc.models.set(0, Some(model));

        let pipeline = Pipeline::new();
        let (out, log) = pipeline
            .retarget(&doc, BoardId::TaranisX7, SettingsVersion::V218)
            .unwrap();
        let timer = &out.models.get(0).unwrap().timers[0];
        assert_eq!(timer.switch, SwitchRef::None);
        assert!(log.entries().iter().any(|e| e.field == "switch"));
    }

    #[test]
    fn normalize_eeprom_repairs_out_of_range_values() {
        use crate::eeprom::test_support::{blank_image, seal};
        let mut bytes = blank_image(BoardId::Stock9x, SettingsVersion::V216);
        bytes[3] = 200; // contrast way out of range
        bytes[4] = 65; // vbat warning in range
        bytes[9] = 40; // current model beyond 16 slots
        seal(BoardId::Stock9x, &mut bytes);
        let image = EepromImage::decode(&bytes, BoardId::Stock9x).unwrap();

        let pipeline = Pipeline::new();
        let (doc, log) = pipeline.normalize(&RawRecord::Eeprom(image));
        assert_eq!(doc.radio.contrast, 45);
        assert_eq!(doc.radio.current_model, 15);
        assert_eq!(log.worst(), Some(Severity::Invalid));
        assert_eq!(
            log.entries().iter().filter(|e| e.severity == Severity::Invalid).count(),
            2
        );
        assert!(log.entries().iter().all(|e| e.origin == "9X v216"));
    }

    #[test]
    fn denormalize_roundtrips_through_eeprom_record() {
        let mut model = ModelData::named("Cub");
        model.model_id = 5;
        model.timers = vec![Timer { seconds: 540, countdown: true, ..Timer::default() }];
        model.curves = vec![Curve {
            smooth: true,
            points: vec![CurvePoint { x: -100, y: -100 }, CurvePoint { x: 100, y: 100 }],
        }];
        let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V218);
        doc.models.set(2, Some(model));
        doc.radio.contrast = 30;

        let pipeline = Pipeline::new();
        let (record, log) = pipeline
            .denormalize(&doc, BoardId::TaranisX9d, SettingsVersion::V218)
            .unwrap();
        assert!(log.is_empty());
        let RawRecord::Eeprom(image) = record else { panic!("expected eeprom record") };
        let (back, _) = pipeline.normalize(&RawRecord::Eeprom(image));
        assert_eq!(back, doc);
    }

    #[test]
    fn denormalize_v221_yields_yaml_record() {
        let doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
        let pipeline = Pipeline::new();
        let (record, _) = pipeline
            .denormalize(&doc, BoardId::Tx16s, SettingsVersion::V221)
            .unwrap();
        assert!(matches!(record, RawRecord::Sdcard(SdcardRecord::Yaml(_))));
    }

    #[test]
    fn legacy_tree_clamps_to_section_caps() {
        // within the X10's own caps (15 chars, 21 points), beyond what a
        // v220 binary section stores (12 chars, 17 points)
        let mut model = ModelData::named("FifteenCharName");
        model.curves = vec![Curve {
            smooth: false,
            points: (0..21).map(|i| CurvePoint { x: (i * 10 - 100) as i8, y: 0 }).collect(),
        }];
        let mut doc = CanonicalDocument::new(BoardId::HorusX10, SettingsVersion::V220);
        doc.models.set(0, Some(model));

        let pipeline = Pipeline::new();
        let (record, log) = pipeline
            .denormalize_tree(&doc, BoardId::HorusX10, SettingsVersion::V220)
            .unwrap();
        let SdcardRecord::Legacy(tree) = record else { panic!("expected legacy tree") };
        assert_eq!(tree.models[0].1.name, "FifteenCharN");
        assert_eq!(tree.models[0].1.curves[0].points.len(), 17);
        assert!(log.entries().iter().any(|e| e.field == "name" && e.action == "truncated"));
        assert!(log.entries().iter().any(|e| e.field == "points" && e.action == "thinned"));
    }

    #[test]
    fn thin_points_keeps_endpoints() {
        let points: Vec<CurvePoint> =
            (0..21).map(|i| CurvePoint { x: i as i8, y: (i * 2) as i8 }).collect();
        let thinned = thin_points(&points, 9);
        assert_eq!(thinned.len(), 9);
        assert_eq!(thinned[0], points[0]);
        assert_eq!(thinned[8], points[20]);
        // strictly increasing x preserved
        for pair in thinned.windows(2) {
            assert!(pair[0].x < pair[1].x);
        }
    }
}
