//! Intel HEX loader.
//!
//! Records have the form `:LLAAAATT[DD...]CC`. Data (00), end-of-file (01),
//! extended segment (02) and extended linear (04) records are honoured; any
//! other record type is skipped. Parsing stops at the first EOF record.

use crate::error::HexError;
use crate::FLASH_SIZE;

const REC_DATA: u8 = 0x00;
const REC_EOF: u8 = 0x01;
const REC_EXT_SEGMENT: u8 = 0x02;
const REC_EXT_LINEAR: u8 = 0x04;

/// Parse HEX text into `flash`.
///
/// Returns the highest byte address written plus one.
pub fn parse_hex(text: &str, flash: &mut [u8]) -> Result<usize, HexError> {
    let mut image_end = 0usize;
    let mut base: usize = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let rec = raw.trim();
        if rec.is_empty() {
            continue;
        }
        let body = rec.strip_prefix(':').ok_or(HexError::InvalidStart { line })?;
        let bytes = decode_pairs(body, line)?;
        if bytes.len() < 5 {
            return Err(HexError::Truncated { line });
        }

        let count = bytes[0] as usize;
        if bytes.len() < count + 5 {
            return Err(HexError::Truncated { line });
        }
        let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let kind = bytes[3];
        let payload = &bytes[4..4 + count];

        let expected = bytes[4 + count];
        let actual = bytes[..4 + count]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b))
            .wrapping_neg();
        if expected != actual {
            return Err(HexError::Checksum { line, expected, actual });
        }

        match kind {
            REC_DATA => {
                let start = base + offset;
                let end = start + payload.len();
                if end > flash.len() {
                    return Err(HexError::OutOfRange { line, address: start });
                }
                flash[start..end].copy_from_slice(payload);
                image_end = image_end.max(end);
            }
            REC_EOF => break,
            REC_EXT_SEGMENT if payload.len() >= 2 => {
                base = (u16::from_be_bytes([payload[0], payload[1]]) as usize) << 4;
            }
            REC_EXT_LINEAR if payload.len() >= 2 => {
                base = (u16::from_be_bytes([payload[0], payload[1]]) as usize) << 16;
            }
            other => log::debug!("hex line {}: skipping record type {:#04x}", line, other),
        }
    }

    Ok(image_end)
}

/// Parse HEX text into a flash-sized image (erased bytes are 0xFF).
pub fn hex_to_image(text: &str) -> Result<Vec<u8>, HexError> {
    let mut flash = vec![0xFFu8; FLASH_SIZE];
    let len = parse_hex(text, &mut flash)?;
    log::debug!("hex image: {} bytes", len);
    Ok(flash)
}

fn decode_pairs(body: &str, line: usize) -> Result<Vec<u8>, HexError> {
    if body.len() % 2 != 0 || !body.is_ascii() {
        return Err(HexError::InvalidDigit { line });
    }
    (0..body.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&body[i..i + 2], 16).map_err(|_| HexError::InvalidDigit { line }))
        .collect()
}
