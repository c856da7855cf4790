//! Board catalog.
//!
//! Every supported transmitter is described by one [`Board`] entry: storage
//! capacity, model slot geometry, control counts and checksum algorithm.
//! The rest of the crate never hardcodes a board property; it asks the
//! catalog. Adding a transmitter means adding one entry here (and, if it
//! introduces a new on-disk layout, a layout table in the eeprom module).

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumKind;

/// Identifies a supported transmitter model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardId {
    /// 9X with stock 64 KBit EEPROM (2 KiB).
    Stock9x,
    /// 9X modified with an M128 MCU (4 KiB EEPROM).
    M128,
    /// Sky9x ARM conversion board.
    Sky9x,
    /// 9XR-Pro.
    NineXrPro,
    /// FrSky Taranis X9D.
    TaranisX9d,
    /// FrSky Taranis X9D+.
    TaranisX9dPlus,
    /// FrSky Taranis X7 / X7S.
    TaranisX7,
    /// FrSky Taranis X9E.
    TaranisX9e,
    /// FrSky Taranis X-Lite.
    TaranisXLite,
    /// FrSky Horus X10 / X10S (SD-card storage).
    HorusX10,
    /// FrSky Horus X12S (SD-card storage).
    HorusX12s,
    /// Radiomaster TX16S (SD-card storage).
    Tx16s,
}

impl BoardId {
    /// All catalog boards, in catalog order.
    pub const ALL: [BoardId; 12] = [
        BoardId::Stock9x,
        BoardId::M128,
        BoardId::Sky9x,
        BoardId::NineXrPro,
        BoardId::TaranisX9d,
        BoardId::TaranisX9dPlus,
        BoardId::TaranisX7,
        BoardId::TaranisX9e,
        BoardId::TaranisXLite,
        BoardId::HorusX10,
        BoardId::HorusX12s,
        BoardId::Tx16s,
    ];

    /// Catalog entry for this board.
    pub fn spec(self) -> &'static Board {
        match self {
            BoardId::Stock9x => &STOCK_9X,
            BoardId::M128 => &M128_BOARD,
            BoardId::Sky9x => &SKY9X,
            BoardId::NineXrPro => &NINE_XR_PRO,
            BoardId::TaranisX9d => &TARANIS_X9D,
            BoardId::TaranisX9dPlus => &TARANIS_X9DP,
            BoardId::TaranisX7 => &TARANIS_X7,
            BoardId::TaranisX9e => &TARANIS_X9E,
            BoardId::TaranisXLite => &TARANIS_XLITE,
            BoardId::HorusX10 => &HORUS_X10,
            BoardId::HorusX12s => &HORUS_X12S,
            BoardId::Tx16s => &TX16S,
        }
    }

    /// Resolve a variant code stored in an image header.
    pub fn from_variant(code: u16) -> Option<BoardId> {
        BoardId::ALL
            .iter()
            .copied()
            .find(|id| id.spec().variant == code)
    }

    /// Resolve a board name as written in YAML trees (`board: x9d+`).
    pub fn from_name(name: &str) -> Option<BoardId> {
        BoardId::ALL
            .iter()
            .copied()
            .find(|id| id.spec().yaml_name.eq_ignore_ascii_case(name))
    }

    /// Human readable board name for diagnostics and conversion logs.
    pub fn display_name(self) -> &'static str {
        self.spec().name
    }

    /// Boards whose flat EEPROM image is exactly `size` bytes long.
    pub fn with_eeprom_size(size: usize) -> Vec<BoardId> {
        BoardId::ALL
            .iter()
            .copied()
            .filter(|id| id.spec().geometry.map(|g| g.image_size) == Some(size))
            .collect()
    }
}

impl core::fmt::Display for BoardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Storage-format generation carried in every image and document.
///
/// The numeric values are the on-disk version bytes; the ordering of the
/// variants is the conversion ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SettingsVersion {
    /// Early binary layout: short names, single-digit curve points.
    V216,
    /// Extended binary layout: longer names, extended model flags.
    V218,
    /// Adds owner callsign and registration id to radio settings.
    V219,
    /// Wide timers and extended curve resolution on colour boards.
    V220,
    /// YAML storage generation with model labels.
    V221,
}

impl SettingsVersion {
    /// Conversion ladder, oldest first. Conversions walk this list one
    /// step at a time in either direction.
    pub const LADDER: [SettingsVersion; 5] = [
        SettingsVersion::V216,
        SettingsVersion::V218,
        SettingsVersion::V219,
        SettingsVersion::V220,
        SettingsVersion::V221,
    ];

    /// On-disk version byte.
    pub fn to_u8(self) -> u8 {
        match self {
            SettingsVersion::V216 => 216,
            SettingsVersion::V218 => 218,
            SettingsVersion::V219 => 219,
            SettingsVersion::V220 => 220,
            SettingsVersion::V221 => 221,
        }
    }

    /// Parse an on-disk version byte. Unknown values are rejected rather
    /// than clamped; an image from a newer firmware must not be half-read.
    pub fn from_u8(value: u8) -> Option<SettingsVersion> {
        match value {
            216 => Some(SettingsVersion::V216),
            218 => Some(SettingsVersion::V218),
            219 => Some(SettingsVersion::V219),
            220 => Some(SettingsVersion::V220),
            221 => Some(SettingsVersion::V221),
            _ => None,
        }
    }

    /// Position in the conversion ladder.
    pub(crate) fn ladder_index(self) -> usize {
        match self {
            SettingsVersion::V216 => 0,
            SettingsVersion::V218 => 1,
            SettingsVersion::V219 => 2,
            SettingsVersion::V220 => 3,
            SettingsVersion::V221 => 4,
        }
    }
}

impl core::fmt::Display for SettingsVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.to_u8())
    }
}

impl TryFrom<u8> for SettingsVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SettingsVersion::from_u8(value)
            .ok_or_else(|| format!("unknown settings version {value}"))
    }
}

impl From<SettingsVersion> for u8 {
    fn from(version: SettingsVersion) -> u8 {
        version.to_u8()
    }
}

/// Binary layout family. Boards in one family share field offsets; they
/// differ only in capacities declared by their catalog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutFamily {
    /// 9X descendants: compact general section and model slots.
    Avr,
    /// Taranis descendants: wide general section and model slots.
    Taranis,
}

/// Flat image geometry for boards with internal EEPROM storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepromGeometry {
    /// Total image size in bytes, checksum trailer included.
    pub image_size: usize,
    /// Length of the general (radio settings) section at offset 0.
    pub general_size: usize,
    /// Offset of the first model slot.
    pub model_base: usize,
    /// Stride between model slots.
    pub model_stride: usize,
    /// Field offsets within sections.
    pub family: LayoutFamily,
}

impl EepromGeometry {
    /// Byte range of model slot `index`.
    #[inline]
    pub fn model_slot(&self, index: usize) -> core::ops::Range<usize> {
        let start = self.model_base + index * self.model_stride;
        start..start + self.model_stride
    }

    /// Byte range covered by the checksum (everything before the trailer).
    #[inline]
    pub fn checksum_payload(&self) -> core::ops::Range<usize> {
        0..self.image_size - 2
    }
}

/// One catalog entry. All capacity and layout questions about a transmitter
/// are answered here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: BoardId,
    /// Display name for diagnostics.
    pub name: &'static str,
    /// Short name used in YAML trees and archive manifests.
    pub yaml_name: &'static str,
    /// Variant code stored in image headers and archive manifests.
    pub variant: u16,
    /// Flat image geometry, `None` for SD-card-only boards.
    pub geometry: Option<EepromGeometry>,
    /// Checksum algorithm for flat images. Meaningless without geometry.
    pub checksum: ChecksumKind,
    /// Number of model slots.
    pub max_models: usize,
    /// Maximum model and radio name length in characters.
    pub name_len: usize,
    /// Number of physical switches.
    pub switches: usize,
    /// Number of pots and sliders.
    pub pots: usize,
    /// Hardware ceiling on points per curve. Versions may cap lower.
    pub max_curve_points: usize,
}

impl Board {
    /// Whether this board stores settings on an SD card rather than in a
    /// flat EEPROM image.
    #[inline]
    pub fn is_sdcard(&self) -> bool {
        self.geometry.is_none()
    }
}

const AVR_SMALL: EepromGeometry = EepromGeometry {
    image_size: 2048,
    general_size: 64,
    model_base: 64,
    model_stride: 120,
    family: LayoutFamily::Avr,
};

const AVR_LARGE: EepromGeometry = EepromGeometry {
    image_size: 4096,
    general_size: 64,
    model_base: 64,
    model_stride: 128,
    family: LayoutFamily::Avr,
};

const TARANIS_32K: EepromGeometry = EepromGeometry {
    image_size: 32768,
    general_size: 128,
    model_base: 128,
    model_stride: 512,
    family: LayoutFamily::Taranis,
};

const TARANIS_64K: EepromGeometry = EepromGeometry {
    image_size: 65536,
    general_size: 128,
    model_base: 128,
    model_stride: 1024,
    family: LayoutFamily::Taranis,
};

static STOCK_9X: Board = Board {
    id: BoardId::Stock9x,
    name: "9X",
    yaml_name: "9x",
    variant: 0x0001,
    geometry: Some(AVR_SMALL),
    checksum: ChecksumKind::Sum16,
    max_models: 16,
    name_len: 10,
    switches: 7,
    pots: 3,
    max_curve_points: 17,
};

static M128_BOARD: Board = Board {
    id: BoardId::M128,
    name: "9X-M128",
    yaml_name: "9x128",
    variant: 0x0002,
    geometry: Some(AVR_LARGE),
    checksum: ChecksumKind::Sum16,
    max_models: 30,
    name_len: 10,
    switches: 7,
    pots: 3,
    max_curve_points: 17,
};

static SKY9X: Board = Board {
    id: BoardId::Sky9x,
    name: "Sky9x",
    yaml_name: "sky9x",
    variant: 0x0010,
    geometry: Some(AVR_LARGE),
    checksum: ChecksumKind::Crc16,
    max_models: 30,
    name_len: 10,
    switches: 7,
    pots: 3,
    max_curve_points: 17,
};

static NINE_XR_PRO: Board = Board {
    id: BoardId::NineXrPro,
    name: "9XR-Pro",
    yaml_name: "9xrpro",
    variant: 0x0011,
    geometry: Some(AVR_LARGE),
    checksum: ChecksumKind::Crc16,
    max_models: 30,
    name_len: 10,
    switches: 7,
    pots: 3,
    max_curve_points: 17,
};

static TARANIS_X9D: Board = Board {
    id: BoardId::TaranisX9d,
    name: "Taranis X9D",
    yaml_name: "x9d",
    variant: 0x0020,
    geometry: Some(TARANIS_32K),
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 12,
    switches: 8,
    pots: 4,
    max_curve_points: 17,
};

static TARANIS_X9DP: Board = Board {
    id: BoardId::TaranisX9dPlus,
    name: "Taranis X9D+",
    yaml_name: "x9d+",
    variant: 0x0021,
    geometry: Some(TARANIS_32K),
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 12,
    switches: 8,
    pots: 4,
    max_curve_points: 17,
};

static TARANIS_X7: Board = Board {
    id: BoardId::TaranisX7,
    name: "Taranis X7",
    yaml_name: "x7",
    variant: 0x0022,
    geometry: Some(TARANIS_32K),
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 12,
    switches: 6,
    pots: 2,
    max_curve_points: 17,
};

static TARANIS_X9E: Board = Board {
    id: BoardId::TaranisX9e,
    name: "Taranis X9E",
    yaml_name: "x9e",
    variant: 0x0023,
    geometry: Some(TARANIS_64K),
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 12,
    switches: 18,
    pots: 4,
    max_curve_points: 17,
};

static TARANIS_XLITE: Board = Board {
    id: BoardId::TaranisXLite,
    name: "Taranis X-Lite",
    yaml_name: "xlite",
    variant: 0x0024,
    geometry: Some(TARANIS_32K),
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 12,
    switches: 4,
    pots: 2,
    max_curve_points: 17,
};

static HORUS_X10: Board = Board {
    id: BoardId::HorusX10,
    name: "Horus X10",
    yaml_name: "x10",
    variant: 0x0040,
    geometry: None,
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 15,
    switches: 8,
    pots: 7,
    max_curve_points: 21,
};

static HORUS_X12S: Board = Board {
    id: BoardId::HorusX12s,
    name: "Horus X12S",
    yaml_name: "x12s",
    variant: 0x0041,
    geometry: None,
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 15,
    switches: 8,
    pots: 7,
    max_curve_points: 21,
};

static TX16S: Board = Board {
    id: BoardId::Tx16s,
    name: "Radiomaster TX16S",
    yaml_name: "tx16s",
    variant: 0x0042,
    geometry: None,
    checksum: ChecksumKind::Crc16,
    max_models: 60,
    name_len: 15,
    switches: 8,
    pots: 6,
    max_curve_points: 21,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_codes_are_unique() {
        for a in BoardId::ALL {
            for b in BoardId::ALL {
                if a != b {
                    assert_ne!(a.spec().variant, b.spec().variant, "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn geometry_fits_image() {
        for id in BoardId::ALL {
            let board = id.spec();
            if let Some(g) = board.geometry {
                let last = g.model_base + board.max_models * g.model_stride;
                // model slots plus trailer must fit the image
                assert!(last + 2 <= g.image_size, "{id}: {last} + 2 > {}", g.image_size);
                assert_eq!(g.checksum_payload().end, g.image_size - 2);
            }
        }
    }

    #[test]
    fn size_lookup_finds_all_candidates() {
        assert_eq!(BoardId::with_eeprom_size(2048), vec![BoardId::Stock9x]);
        assert_eq!(
            BoardId::with_eeprom_size(4096),
            vec![BoardId::M128, BoardId::Sky9x, BoardId::NineXrPro]
        );
        let at_32k = BoardId::with_eeprom_size(32768);
        assert_eq!(at_32k.len(), 4);
        assert!(at_32k.contains(&BoardId::TaranisX7));
        assert!(BoardId::with_eeprom_size(1234).is_empty());
    }

    #[test]
    fn variant_resolves_back_to_board() {
        for id in BoardId::ALL {
            assert_eq!(BoardId::from_variant(id.spec().variant), Some(id));
        }
        assert_eq!(BoardId::from_variant(0xFFFF), None);
    }

    #[test]
    fn yaml_names_resolve() {
        assert_eq!(BoardId::from_name("x9d+"), Some(BoardId::TaranisX9dPlus));
        assert_eq!(BoardId::from_name("TX16S"), Some(BoardId::Tx16s));
        assert_eq!(BoardId::from_name("futaba"), None);
    }

    #[test]
    fn version_ladder_is_ordered() {
        let ladder = SettingsVersion::LADDER;
        for pair in ladder.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_u8() < pair[1].to_u8());
        }
        for (i, v) in ladder.iter().enumerate() {
            assert_eq!(v.ladder_index(), i);
            assert_eq!(SettingsVersion::from_u8(v.to_u8()), Some(*v));
        }
    }

    #[test]
    fn unknown_version_rejected() {
        assert_eq!(SettingsVersion::from_u8(217), None);
        assert_eq!(SettingsVersion::from_u8(0), None);
        assert_eq!(SettingsVersion::from_u8(255), None);
    }

    #[test]
    fn sdcard_boards_have_no_geometry() {
        for id in [BoardId::HorusX10, BoardId::HorusX12s, BoardId::Tx16s] {
            assert!(id.spec().is_sdcard());
        }
        assert!(!BoardId::TaranisX9d.spec().is_sdcard());
    }
}
