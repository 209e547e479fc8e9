//! PlayReady Object (`mspr:pro`) records.
//!
//! ```text
//! u32 LE  total length, including this field
//! u16 LE  record count
//! records:
//!   u16 LE  type (1 = rights management header)
//!   u16 LE  value length
//!   value   UTF-16LE XML for type 1
//! ```

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dash::xml::parse_document;

pub const RIGHTS_MANAGEMENT_HEADER: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayReadyRecord {
    pub record_type: u16,
    pub value: Vec<u8>,
}

fn read_records(data: &[u8]) -> std::io::Result<Option<Vec<PlayReadyRecord>>> {
    let mut cursor = Cursor::new(data);
    let total_length = cursor.read_u32::<LittleEndian>()?;
    if total_length as usize != data.len() {
        tracing::warn!(
            declared = total_length,
            actual = data.len(),
            "PlayReady Object with invalid length encountered"
        );
        return Ok(None);
    }

    let count = cursor.read_u16::<LittleEndian>()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let record_type = cursor.read_u16::<LittleEndian>()?;
        let length = cursor.read_u16::<LittleEndian>()?;
        if length % 2 != 0 {
            tracing::warn!(length, "PlayReady Object record with odd length encountered");
            return Ok(None);
        }

        let mut value = vec![0u8; length as usize];
        cursor.read_exact(&mut value)?;
        records.push(PlayReadyRecord { record_type, value });
    }
    Ok(Some(records))
}

/// Parses the records of a PlayReady Object.
///
/// Structural problems are logged and yield no records.
pub fn parse_object(data: &[u8]) -> Vec<PlayReadyRecord> {
    match read_records(data) {
        Ok(records) => records.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Truncated PlayReady Object encountered");
            Vec::new()
        }
    }
}

/// Serializes records into a PlayReady Object.
pub fn build_object(records: &[PlayReadyRecord]) -> Vec<u8> {
    let total_length = 6 + records.iter().map(|r| 4 + r.value.len()).sum::<usize>();
    let mut output = Vec::with_capacity(total_length);
    output.extend_from_slice(&(total_length as u32).to_le_bytes());
    output.extend_from_slice(&(records.len() as u16).to_le_bytes());
    for record in records {
        output.extend_from_slice(&record.record_type.to_le_bytes());
        output.extend_from_slice(&(record.value.len() as u16).to_le_bytes());
        output.extend_from_slice(&record.value);
    }
    output
}

pub fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// The XML rights management header, if the object has one.
pub fn rights_management_header(records: &[PlayReadyRecord]) -> Option<String> {
    records
        .iter()
        .find(|record| record.record_type == RIGHTS_MANAGEMENT_HEADER)
        .map(|record| decode_utf16le(&record.value))
}

/// `WRMHEADER/DATA/LA_URL` of a PlayReady Object.
pub fn license_url(data: &[u8]) -> Option<String> {
    let header = rights_management_header(&parse_object(data))?;
    let header = header.trim_start_matches('\u{feff}');
    let root = match parse_document(header) {
        Ok(root) => root,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid PlayReady rights management header");
            return None;
        }
    };
    root.find_descendant("DATA")
        .and_then(|data| data.find_descendant("LA_URL"))
        .and_then(|url| url.non_empty_text())
        .map(str::to_string)
}
