//! Flat EEPROM image codec.
//!
//! Binary settings images are a fixed-geometry buffer: a three byte header
//! (version byte, then a little-endian variant code identifying the board),
//! the general settings section, a table of model slots, and a two byte
//! checksum trailer covering everything before it. Geometry comes from the
//! board catalog; field placement comes from the layout tables in this
//! module.
//!
//! Decoding is strict about structure (size, version, variant, checksum)
//! and tolerant about values: out of range values are carried into the raw
//! record untouched, because range enforcement is the conversion pipeline's
//! job and must be logged there. Encoding is the opposite: a value that
//! cannot be represented in its field is an error, never a silent clamp.
//!
//! The decoded [`EepromImage`] keeps the original buffer alongside the
//! parsed records, so re-encoding an unmodified image reproduces it byte
//! for byte, reserved areas included.

use crate::boards::{Board, BoardId, EepromGeometry, LayoutFamily, SettingsVersion};
use crate::checksum::{read_trailer, write_trailer};
use crate::error::{Error, Result};

/// Offset of the version byte in an image or general section.
pub(crate) const VERSION_OFFSET: usize = 0;
/// Offset of the little-endian variant code.
pub(crate) const VARIANT_OFFSET: usize = 1;
/// Header bytes before the first general field.
pub(crate) const HEADER_LEN: usize = 3;

const TIMER_SLOT_LEN: usize = 8;
const CURVE_SLOT_LEN: usize = 36;
pub(crate) const CURVE_MAX_POINTS: usize = 17;

// ---------------------------------------------------------------------------
// byte helpers
// ---------------------------------------------------------------------------

#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[inline]
pub(crate) fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ---------------------------------------------------------------------------
// field tables
// ---------------------------------------------------------------------------

/// Identifies a scalar field in the general section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldId {
    Contrast,
    VbatWarn,
    BeepMode,
    BacklightDelay,
    InactivityTimer,
    StickMode,
    CurrentModel,
    OwnerCallsign,
    OwnerRegistrationId,
}

impl FieldId {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldId::Contrast => "contrast",
            FieldId::VbatWarn => "vbat_warn",
            FieldId::BeepMode => "beep_mode",
            FieldId::BacklightDelay => "backlight_delay",
            FieldId::InactivityTimer => "inactivity_timer",
            FieldId::StickMode => "stick_mode",
            FieldId::CurrentModel => "current_model",
            FieldId::OwnerCallsign => "owner_callsign",
            FieldId::OwnerRegistrationId => "owner_registration_id",
        }
    }
}

impl core::fmt::Display for FieldId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical representation of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    I8,
    /// Zero-padded character field of the given length.
    Str(usize),
}

/// Placement of one general field: where it lives, since when, and the
/// declared value range for integer kinds.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub id: FieldId,
    pub offset: usize,
    pub kind: FieldKind,
    /// First settings version carrying this field. Older images leave the
    /// bytes reserved.
    pub since: SettingsVersion,
    /// Declared range, inclusive. Zero for string kinds.
    pub min: i64,
    pub max: i64,
}

macro_rules! field {
    ($id:ident, $offset:expr, $kind:expr, $since:ident, $min:expr, $max:expr) => {
        FieldSpec {
            id: FieldId::$id,
            offset: $offset,
            kind: $kind,
            since: SettingsVersion::$since,
            min: $min,
            max: $max,
        }
    };
}

/// General section layout, shared by every binary board family.
pub(crate) const GENERAL_FIELDS: &[FieldSpec] = &[
    field!(Contrast, 3, FieldKind::U8, V216, 10, 45),
    field!(VbatWarn, 4, FieldKind::U8, V216, 30, 120),
    field!(BeepMode, 5, FieldKind::I8, V216, -2, 1),
    field!(BacklightDelay, 6, FieldKind::U8, V216, 0, 60),
    field!(InactivityTimer, 7, FieldKind::U8, V216, 0, 250),
    field!(StickMode, 8, FieldKind::U8, V216, 0, 3),
    field!(CurrentModel, 9, FieldKind::U8, V216, 0, 59),
    field!(OwnerCallsign, 10, FieldKind::Str(10), V219, 0, 0),
    field!(OwnerRegistrationId, 20, FieldKind::Str(8), V219, 0, 0),
];

/// Table entry for `id`, if the general section carries it.
pub(crate) fn general_field(id: FieldId) -> Option<&'static FieldSpec> {
    GENERAL_FIELDS.iter().find(|spec| spec.id == id)
}

/// Model slot layout for one board family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelLayout {
    pub name_offset: usize,
    pub name_len: usize,
    /// Flags byte: bit 0 extended limits, bit 1 extended trims.
    pub flags_offset: usize,
    pub model_id_offset: usize,
    pub timer_offsets: &'static [usize],
    pub curve_base: usize,
    pub curve_slots: usize,
}

const AVR_MODEL_LAYOUT: ModelLayout = ModelLayout {
    name_offset: 0,
    name_len: 10,
    flags_offset: 10,
    model_id_offset: 11,
    timer_offsets: &[12, 20],
    curve_base: 28,
    curve_slots: 2,
};

const TARANIS_MODEL_LAYOUT: ModelLayout = ModelLayout {
    name_offset: 0,
    name_len: 12,
    flags_offset: 12,
    model_id_offset: 13,
    timer_offsets: &[16, 24, 32],
    curve_base: 40,
    curve_slots: 8,
};

pub(crate) fn model_layout(family: LayoutFamily) -> &'static ModelLayout {
    match family {
        LayoutFamily::Avr => &AVR_MODEL_LAYOUT,
        LayoutFamily::Taranis => &TARANIS_MODEL_LAYOUT,
    }
}

// ---------------------------------------------------------------------------
// raw records
// ---------------------------------------------------------------------------

/// An uninterpreted field value, as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Str(String),
}

impl core::fmt::Display for RawValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Str(s) => f.write_str(s),
        }
    }
}

/// Decoded general section: ordered field values, exactly as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralRecord {
    pub fields: Vec<(FieldId, RawValue)>,
}

impl GeneralRecord {
    pub fn get(&self, id: FieldId) -> Option<&RawValue> {
        self.fields.iter().find(|(f, _)| *f == id).map(|(_, v)| v)
    }

    pub fn int(&self, id: FieldId) -> Option<i64> {
        match self.get(id) {
            Some(RawValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, id: FieldId) -> Option<&str> {
        match self.get(id) {
            Some(RawValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Set or append a field value.
    pub fn set(&mut self, id: FieldId, value: RawValue) {
        match self.fields.iter_mut().find(|(f, _)| *f == id) {
            Some((_, v)) => *v = value,
            None => self.fields.push((id, value)),
        }
    }
}

/// One timer slot, as stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTimer {
    pub value: u32,
    pub switch: i8,
    pub countdown: bool,
    pub persistent: bool,
}

/// One curve slot, as stored. Empty slots (zero points) are not kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCurve {
    pub smooth: bool,
    pub points: Vec<(i8, i8)>,
}

/// One model slot, as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRecord {
    pub name: String,
    pub model_id: u8,
    pub extended_limits: bool,
    pub extended_trims: bool,
    pub timers: Vec<RawTimer>,
    pub curves: Vec<RawCurve>,
}

/// Decode options. The default is fully strict.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Accept an image whose trailer checksum does not verify. Used when a
    /// caller explicitly chooses to salvage a damaged image.
    pub ignore_checksum: bool,
}

/// A decoded flat image: parsed records plus the original bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct EepromImage {
    pub board: BoardId,
    pub version: SettingsVersion,
    pub variant: u16,
    pub general: GeneralRecord,
    /// Model slots in index order; `None` is an erased slot.
    pub models: Vec<Option<ModelRecord>>,
    bytes: Vec<u8>,
}

impl EepromImage {
    /// Decode a flat image for `board`, fully strict.
    pub fn decode(bytes: &[u8], board: BoardId) -> Result<EepromImage> {
        EepromImage::decode_with(bytes, board, DecodeOptions::default())
    }

    /// Decode a flat image with explicit options.
    pub fn decode_with(bytes: &[u8], board: BoardId, opts: DecodeOptions) -> Result<EepromImage> {
        let spec = board.spec();
        let geometry = binary_geometry(spec)?;

        if bytes.len() != geometry.image_size {
            return Err(Error::SizeMismatch {
                actual: bytes.len(),
                expected: geometry.image_size,
                detail: size_detail(bytes.len(), geometry.image_size),
            });
        }

        let version = decode_version(bytes[VERSION_OFFSET])?;

        let variant = read_u16(bytes, VARIANT_OFFSET);
        if variant != spec.variant {
            return Err(match BoardId::from_variant(variant) {
                Some(found) => Error::WrongBoard { expected: board, found },
                None => Error::UnknownBoard { name: format!("variant {variant:#06x}") },
            });
        }

        if !opts.ignore_checksum {
            let payload = &bytes[geometry.checksum_payload()];
            let stored = read_trailer(bytes);
            spec.checksum
                .verify(payload, stored)
                .map_err(|(stored, computed)| Error::ChecksumMismatch { stored, computed })?;
        }

        let general = decode_general_fields(bytes, version);
        let layout = model_layout(geometry.family);
        let mut models = Vec::with_capacity(spec.max_models);
        for slot in 0..spec.max_models {
            models.push(decode_model_slot(&bytes[geometry.model_slot(slot)], layout));
        }

        Ok(EepromImage {
            board,
            version,
            variant,
            general,
            models,
            bytes: bytes.to_vec(),
        })
    }

    /// Build an image from records, starting from a zeroed buffer.
    pub fn from_records(
        board: BoardId,
        version: SettingsVersion,
        general: GeneralRecord,
        models: Vec<Option<ModelRecord>>,
    ) -> Result<EepromImage> {
        let spec = board.spec();
        let geometry = binary_geometry(spec)?;
        if version == SettingsVersion::V221 {
            return Err(Error::IncompatibleTarget { board, version, target: "EEPROM image" });
        }
        if models.len() > spec.max_models {
            return Err(Error::FieldOutOfRange {
                field: "model slots".into(),
                value: models.len().to_string(),
                board,
                version,
            });
        }
        let mut models = models;
        models.resize(spec.max_models, None);
        let mut image = EepromImage {
            board,
            version,
            variant: spec.variant,
            general,
            models,
            bytes: vec![0; geometry.image_size],
        };
        // materialize once so the retained buffer matches the records
        image.bytes = image.encode()?;
        Ok(image)
    }

    /// Encode back to a flat image.
    ///
    /// Starts from the buffer the image was decoded from, so bytes that no
    /// field maps survive unchanged, then rewrites every mapped field and
    /// the checksum trailer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let spec = self.board.spec();
        let geometry = binary_geometry(spec)?;
        if self.version == SettingsVersion::V221 {
            return Err(Error::IncompatibleTarget {
                board: self.board,
                version: self.version,
                target: "EEPROM image",
            });
        }

        let mut out = self.bytes.clone();
        debug_assert_eq!(out.len(), geometry.image_size);

        write_section_header(&mut out, self.version, spec.variant);
        encode_general_fields(&mut out, &self.general, self.version).map_err(|id| {
            Error::FieldOutOfRange {
                field: id.to_string(),
                value: self.general.get(id).map(|v| v.to_string()).unwrap_or_default(),
                board: self.board,
                version: self.version,
            }
        })?;

        let layout = model_layout(geometry.family);
        for (slot, model) in self.models.iter().enumerate() {
            if slot >= spec.max_models {
                break;
            }
            let range = geometry.model_slot(slot);
            match model {
                Some(record) => {
                    encode_model_slot(&mut out[range], layout, record).map_err(|field| {
                        self.range_error(&format!("model {:02} {field}", slot + 1), record)
                    })?;
                }
                None => out[range].fill(0),
            }
        }

        let checksum = spec.checksum.compute(&out[geometry.checksum_payload()]);
        write_trailer(&mut out, checksum);
        Ok(out)
    }

    /// The buffer this image was decoded from (or built over).
    pub fn source_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range_error(&self, field: &str, record: &ModelRecord) -> Error {
        Error::FieldOutOfRange {
            field: field.to_string(),
            value: record.name.clone(),
            board: self.board,
            version: self.version,
        }
    }
}

fn binary_geometry(spec: &Board) -> Result<EepromGeometry> {
    spec.geometry.ok_or(Error::IncompatibleTarget {
        board: spec.id,
        version: SettingsVersion::V221,
        target: "EEPROM image",
    })
}

pub(crate) fn decode_version(byte: u8) -> Result<SettingsVersion> {
    SettingsVersion::from_u8(byte).ok_or(Error::UnknownVersion { version: byte })
}

fn size_detail(actual: usize, expected: usize) -> String {
    if actual == expected * 2 {
        "image is twice the expected size, wrong board selected?".into()
    } else if actual * 2 == expected {
        "image is half the expected size, wrong board selected?".into()
    } else if actual < expected {
        "file truncated?".into()
    } else {
        String::new()
    }
}

// ---------------------------------------------------------------------------
// section codecs (also used for legacy SD card .bin files)
// ---------------------------------------------------------------------------

/// Write the three byte section header.
pub(crate) fn write_section_header(out: &mut [u8], version: SettingsVersion, variant: u16) {
    out[VERSION_OFFSET] = version.to_u8();
    write_u16(out, VARIANT_OFFSET, variant);
}

/// Encode the general fields present in `version` into a buffer that
/// starts with the three byte header. On failure returns the field that
/// would not fit.
pub(crate) fn encode_general_fields(
    out: &mut [u8],
    general: &GeneralRecord,
    version: SettingsVersion,
) -> core::result::Result<(), FieldId> {
    for spec in GENERAL_FIELDS {
        if spec.since > version {
            continue;
        }
        let Some(value) = general.get(spec.id) else { continue };
        encode_field(out, spec, value).map_err(|_| spec.id)?;
    }
    Ok(())
}

/// Decode the general fields present in `version` from a buffer that starts
/// with the three byte header.
pub(crate) fn decode_general_fields(bytes: &[u8], version: SettingsVersion) -> GeneralRecord {
    let mut record = GeneralRecord::default();
    for spec in GENERAL_FIELDS {
        if spec.since > version {
            continue;
        }
        let value = match spec.kind {
            FieldKind::U8 => RawValue::Int(i64::from(bytes[spec.offset])),
            FieldKind::I8 => RawValue::Int(i64::from(bytes[spec.offset] as i8)),
            FieldKind::Str(len) => {
                RawValue::Str(decode_name(&bytes[spec.offset..spec.offset + len]))
            }
        };
        record.fields.push((spec.id, value));
    }
    record
}

fn encode_field(out: &mut [u8], spec: &FieldSpec, value: &RawValue) -> core::result::Result<(), ()> {
    match (spec.kind, value) {
        (FieldKind::U8, RawValue::Int(v)) => {
            let byte = u8::try_from(*v).map_err(|_| ())?;
            out[spec.offset] = byte;
        }
        (FieldKind::I8, RawValue::Int(v)) => {
            let byte = i8::try_from(*v).map_err(|_| ())?;
            out[spec.offset] = byte as u8;
        }
        (FieldKind::Str(len), RawValue::Str(s)) => {
            encode_name(&mut out[spec.offset..spec.offset + len], s)?;
        }
        _ => return Err(()),
    }
    Ok(())
}

/// Decode one model slot. An all-zero slot is an erased slot.
///
/// Timers and curves are positional; interior unused slots are kept (as
/// defaults and empty curves) so re-encoding preserves placement, while
/// trailing unused slots are trimmed since encoding zero-pads them back.
pub(crate) fn decode_model_slot(slot: &[u8], layout: &ModelLayout) -> Option<ModelRecord> {
    if slot.iter().all(|&b| b == 0) {
        return None;
    }

    let name = decode_name(&slot[layout.name_offset..layout.name_offset + layout.name_len]);
    let flags = slot[layout.flags_offset];
    let model_id = slot[layout.model_id_offset];

    let mut timers = Vec::with_capacity(layout.timer_offsets.len());
    for &offset in layout.timer_offsets {
        let value = read_u32(slot, offset);
        let switch = slot[offset + 4] as i8;
        let tflags = slot[offset + 5];
        timers.push(RawTimer {
            value,
            switch,
            countdown: tflags & 0x01 != 0,
            persistent: tflags & 0x02 != 0,
        });
    }
    while timers.last() == Some(&RawTimer::default()) {
        timers.pop();
    }

    let mut curves = Vec::with_capacity(layout.curve_slots);
    for slot_index in 0..layout.curve_slots {
        let base = layout.curve_base + slot_index * CURVE_SLOT_LEN;
        let count = usize::from(slot[base]).min(CURVE_MAX_POINTS);
        if count == 0 {
            curves.push(RawCurve::default());
            continue;
        }
        let smooth = slot[base + 1] & 0x01 != 0;
        let mut points = Vec::with_capacity(count);
        for p in 0..count {
            let at = base + 2 + p * 2;
            points.push((slot[at] as i8, slot[at + 1] as i8));
        }
        curves.push(RawCurve { smooth, points });
    }
    while curves.last().is_some_and(|c| c.points.is_empty()) {
        curves.pop();
    }

    Some(ModelRecord {
        name,
        model_id,
        extended_limits: flags & 0x01 != 0,
        extended_trims: flags & 0x02 != 0,
        timers,
        curves,
    })
}

/// Encode one model slot in place. On failure returns the offending field
/// name for the caller's error.
pub(crate) fn encode_model_slot(
    slot: &mut [u8],
    layout: &ModelLayout,
    record: &ModelRecord,
) -> core::result::Result<(), &'static str> {
    if record.timers.len() > layout.timer_offsets.len() {
        return Err("timers");
    }
    if record.curves.len() > layout.curve_slots {
        return Err("curves");
    }

    encode_name(
        &mut slot[layout.name_offset..layout.name_offset + layout.name_len],
        &record.name,
    )
    .map_err(|_| "name")?;

    let mut flags = 0u8;
    if record.extended_limits {
        flags |= 0x01;
    }
    if record.extended_trims {
        flags |= 0x02;
    }
    slot[layout.flags_offset] = flags;
    slot[layout.model_id_offset] = record.model_id;

    for (i, &offset) in layout.timer_offsets.iter().enumerate() {
        let timer = record.timers.get(i).copied().unwrap_or_default();
        write_u32(slot, offset, timer.value);
        slot[offset + 4] = timer.switch as u8;
        let mut tflags = 0u8;
        if timer.countdown {
            tflags |= 0x01;
        }
        if timer.persistent {
            tflags |= 0x02;
        }
        slot[offset + 5] = tflags;
        slot[offset + 6] = 0;
        slot[offset + 7] = 0;
    }

    for slot_index in 0..layout.curve_slots {
        let base = layout.curve_base + slot_index * CURVE_SLOT_LEN;
        slot[base..base + CURVE_SLOT_LEN].fill(0);
        let Some(curve) = record.curves.get(slot_index) else { continue };
        if curve.points.is_empty() {
            // unused interior slot, stays zeroed
            continue;
        }
        if curve.points.len() > CURVE_MAX_POINTS {
            return Err("curve points");
        }
        slot[base] = curve.points.len() as u8;
        slot[base + 1] = u8::from(curve.smooth);
        for (p, (x, y)) in curve.points.iter().enumerate() {
            let at = base + 2 + p * 2;
            slot[at] = *x as u8;
            slot[at + 1] = *y as u8;
        }
    }

    Ok(())
}

/// Trailing NULs and spaces are padding, not content.
fn decode_name(bytes: &[u8]) -> String {
    let text: String = bytes
        .iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '\u{0}' })
        .collect();
    text.trim_end_matches(['\u{0}', ' ']).replace('\u{0}', " ")
}

fn encode_name(out: &mut [u8], name: &str) -> core::result::Result<(), ()> {
    if name.len() > out.len() || !name.is_ascii() {
        return Err(());
    }
    out.fill(0);
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A structurally valid, empty image for `board` at `version`.
    pub fn blank_image(board: BoardId, version: SettingsVersion) -> Vec<u8> {
        let spec = board.spec();
        let geometry = spec.geometry.unwrap();
        let mut bytes = vec![0u8; geometry.image_size];
        bytes[VERSION_OFFSET] = version.to_u8();
        write_u16(&mut bytes, VARIANT_OFFSET, spec.variant);
        seal(board, &mut bytes);
        bytes
    }

    /// Recompute and store the trailer checksum.
    pub fn seal(board: BoardId, bytes: &mut [u8]) {
        let spec = board.spec();
        let geometry = spec.geometry.unwrap();
        let checksum = spec.checksum.compute(&bytes[geometry.checksum_payload()]);
        write_trailer(bytes, checksum);
    }
}
