//! Intel HEX transport for flat images.
//!
//! Some backup tools move EEPROM contents around as Intel HEX text rather
//! than raw bytes. This module converts between the two; the flat image
//! codec does the rest. Record types 00 (data), 01 (end of file) and
//! 04 (extended linear address) are understood, every line checksum is
//! verified, and unreadable input names the offending line.

use crate::boards::BoardId;
use crate::eeprom::{DecodeOptions, EepromImage};
use crate::error::{Error, Result};

/// Data bytes per emitted record line.
const LINE_DATA_LEN: usize = 32;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXT_LINEAR: u8 = 0x04;

/// Parse Intel HEX text into a contiguous byte image.
///
/// Data records must cover the image without holes: a record that leaves
/// an address gap, or that lands on a range already written, is an error
/// naming the line.
pub fn decode_text(text: &str) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();
    let mut base: u32 = 0;
    let mut saw_eof = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if saw_eof {
            return Err(parse_error(line_no, "data after end-of-file record"));
        }

        let record = parse_record(line, line_no)?;
        match record.kind {
            RECORD_DATA => {
                let start = base + u32::from(record.address);
                let expected = out.len() as u32;
                if start > expected {
                    return Err(parse_error(
                        line_no,
                        &format!("address gap: record starts at {start:#x}, expected {expected:#x}"),
                    ));
                }
                if start < expected {
                    return Err(parse_error(
                        line_no,
                        &format!(
                            "address range already written: record starts at {start:#x}, image covers up to {expected:#x}"
                        ),
                    ));
                }
                out.extend_from_slice(&record.data);
            }
            RECORD_EOF => {
                if !record.data.is_empty() {
                    return Err(parse_error(line_no, "end-of-file record carries data"));
                }
                saw_eof = true;
            }
            RECORD_EXT_LINEAR => {
                if record.data.len() != 2 {
                    return Err(parse_error(line_no, "extended address record must carry 2 bytes"));
                }
                base = u32::from(u16::from_be_bytes([record.data[0], record.data[1]])) << 16;
            }
            other => {
                return Err(parse_error(line_no, &format!("unknown record type {other:#04x}")));
            }
        }
    }

    if !saw_eof {
        return Err(parse_error(text.lines().count().max(1), "missing end-of-file record"));
    }
    Ok(out)
}

/// Render bytes as Intel HEX text, 32 data bytes per line, uppercase,
/// with an extended linear address record at every 64 KiB boundary past
/// the first.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut high_word: u16 = 0;

    for (chunk_index, chunk) in bytes.chunks(LINE_DATA_LEN).enumerate() {
        let address = (chunk_index * LINE_DATA_LEN) as u32;
        let chunk_high = (address >> 16) as u16;
        if chunk_high != high_word {
            high_word = chunk_high;
            push_record(&mut out, 0, RECORD_EXT_LINEAR, &chunk_high.to_be_bytes());
        }
        push_record(&mut out, (address & 0xFFFF) as u16, RECORD_DATA, chunk);
    }

    push_record(&mut out, 0, RECORD_EOF, &[]);
    out
}

/// Decode HEX text straight into a verified flat image.
pub fn decode_image(text: &str, board: BoardId) -> Result<EepromImage> {
    decode_image_with(text, board, DecodeOptions::default())
}

/// Decode HEX text into a flat image with explicit image options.
pub fn decode_image_with(
    text: &str,
    board: BoardId,
    opts: DecodeOptions,
) -> Result<EepromImage> {
    let bytes = decode_text(text)?;
    EepromImage::decode_with(&bytes, board, opts)
}

/// Encode a flat image as HEX text.
pub fn encode_image(image: &EepromImage) -> Result<String> {
    Ok(encode_bytes(&image.encode()?))
}

/// Cheap probe: does this look like the start of an Intel HEX file?
/// Used by format detection before committing to a full parse.
pub(crate) fn looks_like_hex(bytes: &[u8]) -> bool {
    if bytes.first() != Some(&b':') {
        return false;
    }
    // first line must be hex digits only, at least one full record
    let line_end = bytes
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(bytes.len());
    let line = &bytes[1..line_end];
    line.len() >= 10 && line.iter().all(u8::is_ascii_hexdigit)
}

struct HexRecord {
    address: u16,
    kind: u8,
    data: Vec<u8>,
}

fn parse_error(line: usize, reason: &str) -> Error {
    Error::HexParse { line, reason: reason.to_string() }
}

fn parse_record(line: &str, line_no: usize) -> Result<HexRecord> {
    let Some(body) = line.strip_prefix(':') else {
        return Err(parse_error(line_no, "missing ':' start code"));
    };
    if body.len() % 2 != 0 {
        return Err(parse_error(line_no, "odd number of hex digits"));
    }

    let mut bytes = Vec::with_capacity(body.len() / 2);
    for pair in body.as_bytes().chunks(2) {
        let hi = hex_digit(pair[0]).ok_or_else(|| parse_error(line_no, "invalid hex digit"))?;
        let lo = hex_digit(pair[1]).ok_or_else(|| parse_error(line_no, "invalid hex digit"))?;
        bytes.push(hi << 4 | lo);
    }

    // length + address(2) + type + checksum
    if bytes.len() < 5 {
        return Err(parse_error(line_no, "record too short"));
    }
    let length = usize::from(bytes[0]);
    if bytes.len() != length + 5 {
        return Err(parse_error(
            line_no,
            &format!("length field says {length} data bytes, line carries {}", bytes.len() - 5),
        ));
    }

    let sum: u8 = bytes[..bytes.len() - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    let stored = bytes[bytes.len() - 1];
    let computed = sum.wrapping_neg();
    if stored != computed {
        return Err(parse_error(
            line_no,
            &format!("record checksum mismatch: stored {stored:#04x}, computed {computed:#04x}"),
        ));
    }

    Ok(HexRecord {
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: bytes[3],
        data: bytes[4..4 + length].to_vec(),
    })
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn push_record(out: &mut String, address: u16, kind: u8, data: &[u8]) {
    use core::fmt::Write;

    let mut sum = (data.len() as u8)
        .wrapping_add((address >> 8) as u8)
        .wrapping_add(address as u8)
        .wrapping_add(kind);
    let _ = write!(out, ":{:02X}{:04X}{:02X}", data.len(), address, kind);
    for &byte in data {
        sum = sum.wrapping_add(byte);
        let _ = write!(out, "{byte:02X}");
    }
    let _ = write!(out, "{:02X}\n", sum.wrapping_neg());
}
