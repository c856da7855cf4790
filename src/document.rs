//! Canonical in-memory representation of a radio's settings.
//!
//! A [`CanonicalDocument`] is what every reader produces and every writer
//! consumes. It is typed, board- and version-tagged, and normalized: slot
//! indices are explicit, switch references are structured values rather
//! than raw bytes, and labels are lists of strings. Codecs translate
//! between this form and their on-disk layouts; the conversion pipeline
//! rewrites it between settings versions.

use serde::{Deserialize, Serialize};

use crate::boards::{BoardId, SettingsVersion};

/// Reserved label name. Always present in a label catalog and never
/// renamed or deleted by label maintenance.
pub const FAVORITES_LABEL: &str = "Favorites";

/// A complete radio configuration: radio-wide settings plus the model
/// slot table, tagged with the board and storage version it conforms to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub board: BoardId,
    pub version: SettingsVersion,
    pub radio: RadioSettings,
    pub models: ModelSlots,
}

impl CanonicalDocument {
    /// Create an empty document for a board, with default radio settings
    /// and all model slots free.
    pub fn new(board: BoardId, version: SettingsVersion) -> Self {
        CanonicalDocument {
            board,
            version,
            radio: RadioSettings::default(),
            models: ModelSlots::with_capacity(board.spec().max_models),
        }
    }

    /// The label catalog: `Favorites` first, then every attached label in
    /// first-appearance order across the slots.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![FAVORITES_LABEL.to_string()];
        for (_, model) in self.models.iter() {
            for label in &model.labels {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }
        labels
    }

    /// Rename a label on every model carrying it. `Favorites` is reserved
    /// and cannot be renamed. Returns whether anything changed.
    pub fn rename_label(&mut self, from: &str, to: &str) -> bool {
        if from == FAVORITES_LABEL || to.is_empty() || from == to {
            return false;
        }
        let mut changed = false;
        for slot in 0..self.models.capacity() {
            if let Some(model) = self.models.get_mut(slot) {
                if model.remove_label(from) {
                    model.add_label(to);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Detach a label from every model, removing it from the catalog.
    /// `Favorites` is reserved and cannot be removed. Returns whether
    /// anything changed.
    pub fn remove_label(&mut self, label: &str) -> bool {
        if label == FAVORITES_LABEL {
            return false;
        }
        let mut changed = false;
        for slot in 0..self.models.capacity() {
            if let Some(model) = self.models.get_mut(slot) {
                changed |= model.remove_label(label);
            }
        }
        changed
    }
}

/// Radio-wide settings.
///
/// Owner fields are empty strings on versions that predate them; the
/// conversion pipeline drops them on downgrade and logs the drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioSettings {
    /// LCD contrast, 10 to 45.
    pub contrast: u8,
    /// Battery warning threshold in tenths of a volt, 30 to 120.
    pub vbat_warn: u8,
    /// Beeper mode, -2 (silent) to 1 (all keys).
    pub beep_mode: i8,
    /// Backlight timeout in seconds, 0 to 60.
    pub backlight_delay: u8,
    /// Inactivity alarm in minutes, 0 to 250.
    pub inactivity_timer: u8,
    /// Stick mode 0 to 3 (mode 1 to mode 4).
    pub stick_mode: u8,
    /// Index of the last selected model slot.
    pub current_model: u8,
    /// Owner callsign, v219 and later.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_callsign: String,
    /// Regulatory registration id, v219 and later.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner_registration_id: String,
}

impl Default for RadioSettings {
    fn default() -> Self {
        RadioSettings {
            contrast: 25,
            vbat_warn: 65,
            beep_mode: 0,
            backlight_delay: 10,
            inactivity_timer: 10,
            stick_mode: 1,
            current_model: 0,
            owner_callsign: String::new(),
            owner_registration_id: String::new(),
        }
    }
}

/// Fixed-capacity table of model slots. Empty slots stay empty; loading
/// then saving a storage never compacts or reorders models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSlots {
    slots: Vec<Option<ModelData>>,
}

impl ModelSlots {
    /// A table of `capacity` free slots.
    pub fn with_capacity(capacity: usize) -> Self {
        ModelSlots { slots: vec![None; capacity] }
    }

    /// Number of slots, occupied or not.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn used(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Model in slot `index`, if the slot exists and is occupied.
    pub fn get(&self, index: usize) -> Option<&ModelData> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Mutable access to the model in slot `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ModelData> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Put a model into slot `index`, returning the previous occupant.
    /// Out of range indices are ignored and return `None`.
    pub fn set(&mut self, index: usize, model: Option<ModelData>) -> Option<ModelData> {
        match self.slots.get_mut(index) {
            Some(slot) => core::mem::replace(slot, model),
            None => None,
        }
    }

    /// Lowest free slot index, or `None` when the table is full.
    pub fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ModelData)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|m| (i, m)))
    }

    /// All slots in index order, including empty ones.
    pub fn iter_all(&self) -> impl Iterator<Item = (usize, Option<&ModelData>)> {
        self.slots.iter().enumerate().map(|(i, s)| (i, s.as_ref()))
    }

    /// Grow or shrink the table to `capacity` slots. Shrinking discards
    /// the tail; callers log dropped models before resizing.
    pub fn resize(&mut self, capacity: usize) {
        self.slots.resize(capacity, None);
    }
}

/// One model's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub name: String,
    /// Receiver-facing model id, 0 to 63.
    pub model_id: u8,
    pub extended_limits: bool,
    pub extended_trims: bool,
    pub timers: Vec<Timer>,
    pub curves: Vec<Curve>,
    /// Label names attached to this model. Meaningful from v221 on;
    /// earlier versions persist the first label as a category.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl ModelData {
    /// A fresh model with only the name set.
    pub fn named(name: impl Into<String>) -> Self {
        ModelData { name: name.into(), ..ModelData::default() }
    }

    /// Attach a label if not already present. `Favorites` is allowed like
    /// any other label; duplicates are not.
    pub fn add_label(&mut self, label: &str) {
        if !self.labels.iter().any(|l| l == label) {
            self.labels.push(label.to_string());
        }
    }

    /// Detach a label. Returns whether it was present.
    pub fn remove_label(&mut self, label: &str) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        self.labels.len() != before
    }
}

/// A model timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Start value in seconds.
    pub seconds: u32,
    /// Trigger switch.
    pub switch: SwitchRef,
    /// Counts down from `seconds` instead of up.
    pub countdown: bool,
    /// Value survives power cycles.
    pub persistent: bool,
}

/// A custom curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub smooth: bool,
    pub points: Vec<CurvePoint>,
}

/// One curve point. Both axes run -100 to 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: i8,
    pub y: i8,
}

/// Physical switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPosition {
    Up,
    Mid,
    Down,
}

/// Reference to a switch position, as used by timers.
///
/// The compact byte form used in flat images packs three positions per
/// switch: byte `0` is no switch, byte `n > 0` selects switch
/// `(n - 1) / 3` at position `(n - 1) % 3`, and a negative byte inverts
/// the condition. The textual form used in YAML trees spells the same
/// reference as `S<letter><position digit>` with a `!` prefix for
/// inverted, e.g. `SA0` or `!SC2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SwitchRef {
    /// No switch assigned.
    #[default]
    None,
    Switch {
        /// Zero-based physical switch index.
        index: u8,
        position: SwitchPosition,
        /// Condition is true when the switch is NOT in `position`.
        inverted: bool,
    },
}

impl SwitchRef {
    /// Decode the compact byte form. Out of range magnitudes are rejected
    /// so the caller can log and substitute.
    pub fn from_raw(raw: i8) -> Option<SwitchRef> {
        if raw == 0 {
            return Some(SwitchRef::None);
        }
        if raw == i8::MIN {
            // magnitude 128 has no encodable counterpart
            return None;
        }
        let magnitude = raw.unsigned_abs();
        let n = magnitude - 1;
        let index = n / 3;
        let position = match n % 3 {
            0 => SwitchPosition::Up,
            1 => SwitchPosition::Mid,
            _ => SwitchPosition::Down,
        };
        Some(SwitchRef::Switch { index, position, inverted: raw < 0 })
    }

    /// Encode to the compact byte form.
    pub fn to_raw(self) -> i8 {
        match self {
            SwitchRef::None => 0,
            SwitchRef::Switch { index, position, inverted } => {
                let pos = match position {
                    SwitchPosition::Up => 0,
                    SwitchPosition::Mid => 1,
                    SwitchPosition::Down => 2,
                };
                let magnitude = (index as i16) * 3 + pos + 1;
                let value = magnitude.clamp(0, i8::MAX as i16) as i8;
                if inverted { -value } else { value }
            }
        }
    }

    /// Zero-based switch index, if a switch is assigned.
    pub fn switch_index(self) -> Option<u8> {
        match self {
            SwitchRef::None => None,
            SwitchRef::Switch { index, .. } => Some(index),
        }
    }

    /// Parse the textual form. The empty string is the unassigned switch.
    pub fn parse(text: &str) -> Option<SwitchRef> {
        if text.is_empty() {
            return Some(SwitchRef::None);
        }
        let (inverted, rest) = match text.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let mut chars = rest.chars();
        if chars.next()? != 'S' {
            return None;
        }
        let letter = chars.next()?;
        if !letter.is_ascii_uppercase() {
            return None;
        }
        let position = match chars.next()? {
            '0' => SwitchPosition::Up,
            '1' => SwitchPosition::Mid,
            '2' => SwitchPosition::Down,
            _ => return None,
        };
        if chars.next().is_some() {
            return None;
        }
        Some(SwitchRef::Switch { index: letter as u8 - b'A', position, inverted })
    }
}

impl core::fmt::Display for SwitchRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            SwitchRef::None => Ok(()),
            SwitchRef::Switch { index, position, inverted } => {
                if inverted {
                    f.write_str("!")?;
                }
                let letter = (b'A' + index) as char;
                let pos = match position {
                    SwitchPosition::Up => '0',
                    SwitchPosition::Mid => '1',
                    SwitchPosition::Down => '2',
                };
                write!(f, "S{letter}{pos}")
            }
        }
    }
}

impl From<SwitchRef> for String {
    fn from(value: SwitchRef) -> String {
        value.to_string()
    }
}

impl TryFrom<String> for SwitchRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SwitchRef::parse(&value).ok_or_else(|| format!("invalid switch reference {value:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_track_occupancy() {
        let mut slots = ModelSlots::with_capacity(4);
        assert_eq!(slots.capacity(), 4);
        assert_eq!(slots.used(), 0);
        assert_eq!(slots.first_free_slot(), Some(0));

        slots.set(0, Some(ModelData::named("Alpha")));
        slots.set(2, Some(ModelData::named("Beta")));
        assert_eq!(slots.used(), 2);
        assert_eq!(slots.first_free_slot(), Some(1));
        assert_eq!(slots.get(2).map(|m| m.name.as_str()), Some("Beta"));
        assert!(slots.get(1).is_none());

        slots.set(1, Some(ModelData::named("Gamma")));
        slots.set(3, Some(ModelData::named("Delta")));
        assert_eq!(slots.first_free_slot(), None);

        let removed = slots.set(2, None);
        assert_eq!(removed.map(|m| m.name), Some("Beta".to_string()));
        assert_eq!(slots.first_free_slot(), Some(2));
    }

    #[test]
    fn set_out_of_range_is_ignored() {
        let mut slots = ModelSlots::with_capacity(2);
        assert!(slots.set(9, Some(ModelData::named("X"))).is_none());
        assert_eq!(slots.used(), 0);
    }

    #[test]
    fn iter_skips_empty_slots() {
        let mut slots = ModelSlots::with_capacity(3);
        slots.set(1, Some(ModelData::named("Solo")));
        let collected: Vec<(usize, &str)> =
            slots.iter().map(|(i, m)| (i, m.name.as_str())).collect();
        assert_eq!(collected, vec![(1, "Solo")]);
        assert_eq!(slots.iter_all().count(), 3);
    }

    #[test]
    fn labels_dedupe() {
        let mut model = ModelData::named("Plane");
        model.add_label("Gliders");
        model.add_label("Gliders");
        model.add_label(FAVORITES_LABEL);
        assert_eq!(model.labels, vec!["Gliders", FAVORITES_LABEL]);
        assert!(model.remove_label("Gliders"));
        assert!(!model.remove_label("Gliders"));
        assert_eq!(model.labels, vec![FAVORITES_LABEL]);
    }

    #[test]
    fn document_label_maintenance() {
        let mut doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
        let mut cub = ModelData::named("Cub");
        cub.add_label("Planes");
        let mut ka8 = ModelData::named("Ka8");
        ka8.add_label("Planes");
        ka8.add_label(FAVORITES_LABEL);
        doc.models.set(0, Some(cub));
        doc.models.set(2, Some(ka8));

        assert_eq!(doc.labels(), vec![FAVORITES_LABEL, "Planes"]);

        assert!(doc.rename_label("Planes", "Fleet"));
        assert_eq!(doc.labels(), vec![FAVORITES_LABEL, "Fleet"]);
        assert!(!doc.rename_label(FAVORITES_LABEL, "Best"));

        assert!(doc.remove_label("Fleet"));
        assert!(!doc.remove_label("Fleet"));
        assert!(!doc.remove_label(FAVORITES_LABEL));
        assert_eq!(doc.labels(), vec![FAVORITES_LABEL]);
        // the reserved label stays attached where it was
        let ka8 = doc.models.get(2).expect("slot 2");
        assert_eq!(ka8.labels, vec![FAVORITES_LABEL]);
    }

    #[test]
    fn switch_raw_roundtrip() {
        // every encodable byte round-trips, including both extremes
        for raw in -127i8..=127 {
            let decoded = SwitchRef::from_raw(raw).unwrap();
            assert_eq!(decoded.to_raw(), raw, "raw {raw}");
        }
        // -128's magnitude is not encodable, so it is not decodable either
        assert_eq!(SwitchRef::from_raw(i8::MIN), None);
    }

    #[test]
    fn switch_raw_mapping() {
        assert_eq!(SwitchRef::from_raw(0), Some(SwitchRef::None));
        assert_eq!(
            SwitchRef::from_raw(1),
            Some(SwitchRef::Switch { index: 0, position: SwitchPosition::Up, inverted: false })
        );
        assert_eq!(
            SwitchRef::from_raw(-5),
            Some(SwitchRef::Switch { index: 1, position: SwitchPosition::Mid, inverted: true })
        );
    }

    #[test]
    fn switch_text_roundtrip() {
        for text in ["", "SA0", "SB1", "!SC2", "SR0"] {
            let parsed = SwitchRef::parse(text).unwrap();
            assert_eq!(parsed.to_string(), text);
        }
        assert!(SwitchRef::parse("XA0").is_none());
        assert!(SwitchRef::parse("SA3").is_none());
        assert!(SwitchRef::parse("Sa0").is_none());
        assert!(SwitchRef::parse("SA00").is_none());
    }

    #[test]
    fn new_document_matches_board_capacity() {
        let doc = CanonicalDocument::new(BoardId::Stock9x, SettingsVersion::V218);
        assert_eq!(doc.models.capacity(), 16);
        assert_eq!(doc.radio.contrast, 25);
    }
}
