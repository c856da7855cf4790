//! Trailer checksums for flat EEPROM images.
//!
//! Every flat binary image ends in a two byte little-endian checksum covering
//! all preceding bytes. Which algorithm a board uses is declared in its
//! catalog entry: the AVR-era boards carry a plain additive sum, the ARM-era
//! boards a CRC-16/XMODEM.

/// Checksum algorithm selector, declared per board in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Additive 16-bit sum over all covered bytes, wrapping.
    Sum16,
    /// CRC-16/XMODEM (polynomial 0x1021, initial value 0).
    Crc16,
}

impl ChecksumKind {
    /// Compute the checksum of `data` with this algorithm.
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            ChecksumKind::Sum16 => sum16(data),
            ChecksumKind::Crc16 => crc16_xmodem(data),
        }
    }

    /// Verify `data` against a stored checksum value.
    ///
    /// Returns `Err((stored, computed))` on mismatch so callers can build a
    /// diagnostic without recomputing.
    pub fn verify(self, data: &[u8], stored: u16) -> Result<(), (u16, u16)> {
        let computed = self.compute(data);
        if computed == stored {
            Ok(())
        } else {
            Err((stored, computed))
        }
    }
}

fn sum16(data: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for &byte in data {
        sum = sum.wrapping_add(u16::from(byte));
    }
    sum
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Read the two byte trailer of an image buffer.
///
/// Callers must have validated the buffer length already; an image shorter
/// than the trailer has failed size validation long before checksumming.
#[inline]
pub fn read_trailer(bytes: &[u8]) -> u16 {
    let n = bytes.len();
    u16::from_le_bytes([bytes[n - 2], bytes[n - 1]])
}

/// Write `value` into the two byte trailer of an image buffer.
#[inline]
pub fn write_trailer(bytes: &mut [u8], value: u16) {
    let n = bytes.len();
    bytes[n - 2..n].copy_from_slice(&value.to_le_bytes());
}
