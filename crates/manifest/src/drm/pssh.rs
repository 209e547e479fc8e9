use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{ManifestError, ManifestResult};

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];
pub const PLAYREADY_SYSTEM_ID: [u8; 16] = [
    0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f, 0x95,
];
pub const CLEAR_KEY_SYSTEM_ID: [u8; 16] = [
    0x10, 0x77, 0xef, 0xec, 0xc0, 0xb2, 0x4d, 0x02, 0xac, 0xe3, 0x3c, 0x1e, 0x52, 0xe2, 0xfb, 0x4b,
];

const BOX_HEADER_SIZE: u64 = 8;
/// Header, full box fields, system id and data size.
const MIN_BOX_SIZE: u64 = 32;

/// Protection System Specific Header box (ISO/IEC 23001-7 8.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    /// 24 bits.
    pub flags: u32,
    pub system_id: [u8; 16],
    /// Only carried by version 1 boxes.
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

fn malformed(e: io::Error) -> ManifestError {
    ManifestError::MalformedPssh(e.to_string())
}

impl PsshBox {
    /// Version 1 when key ids are given, version 0 otherwise.
    pub fn new(system_id: [u8; 16], key_ids: Vec<[u8; 16]>, data: Vec<u8>) -> Self {
        Self {
            version: if key_ids.is_empty() { 0 } else { 1 },
            flags: 0,
            system_id,
            key_ids,
            data,
        }
    }

    pub fn size(&self) -> usize {
        let key_ids = if self.version > 0 {
            4 + 16 * self.key_ids.len()
        } else {
            0
        };
        MIN_BOX_SIZE as usize + key_ids + self.data.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(self.size());
        output.extend_from_slice(&(self.size() as u32).to_be_bytes());
        output.extend_from_slice(b"pssh");
        let version_and_flags = (self.version as u32) << 24 | (self.flags & 0x00ff_ffff);
        output.extend_from_slice(&version_and_flags.to_be_bytes());
        output.extend_from_slice(&self.system_id);
        if self.version > 0 {
            output.extend_from_slice(&(self.key_ids.len() as u32).to_be_bytes());
            for key_id in &self.key_ids {
                output.extend_from_slice(key_id);
            }
        }
        output.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        output.extend_from_slice(&self.data);
        output
    }

    /// Parses every box in `input`, which may hold several concatenated boxes.
    pub fn parse_all(input: &[u8]) -> ManifestResult<Vec<Self>> {
        let mut boxes = Vec::new();
        let mut offset = 0;
        while offset < input.len() {
            let (pssh, size) = Self::parse_one(&input[offset..])?;
            boxes.push(pssh);
            offset += size;
        }
        Ok(boxes)
    }

    /// Parses a single box, returning it with its size in bytes.
    fn parse_one(input: &[u8]) -> ManifestResult<(Self, usize)> {
        let mut cursor = Cursor::new(input);
        let size = match cursor.read_u32::<BigEndian>().map_err(malformed)? {
            0 => input.len() as u64,
            1 => {
                return Err(ManifestError::MalformedPssh(
                    "64-bit box sizes are not supported".to_string(),
                ))
            }
            size => size as u64,
        };
        if size < MIN_BOX_SIZE || size > input.len() as u64 {
            return Err(ManifestError::MalformedPssh(format!(
                "box size {size} does not fit {} bytes",
                input.len()
            )));
        }

        let mut box_type = [0u8; 4];
        cursor.read_exact(&mut box_type).map_err(malformed)?;
        if &box_type != b"pssh" {
            return Err(ManifestError::MalformedPssh(format!(
                "unexpected box type {:?}",
                String::from_utf8_lossy(&box_type)
            )));
        }

        // everything past the header has to stay inside the declared size
        let body = &input[BOX_HEADER_SIZE as usize..size as usize];
        if body[0] > 1 {
            return Err(ManifestError::MalformedPssh(format!(
                "invalid version {}",
                body[0]
            )));
        }
        let pssh = Self::parse_body(body).map_err(malformed)?;
        Ok((pssh, size as usize))
    }

    fn parse_body(body: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(body);
        let version_and_flags = cursor.read_u32::<BigEndian>()?;
        let version = (version_and_flags >> 24) as u8;

        let mut system_id = [0u8; 16];
        cursor.read_exact(&mut system_id)?;

        let mut key_ids = Vec::new();
        if version > 0 {
            let count = cursor.read_u32::<BigEndian>()?;
            for _ in 0..count {
                let mut key_id = [0u8; 16];
                cursor.read_exact(&mut key_id)?;
                key_ids.push(key_id);
            }
        }

        let data_size = cursor.read_u32::<BigEndian>()? as usize;
        let remaining = body.len() - cursor.position() as usize;
        if data_size > remaining {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("data size {data_size} exceeds the {remaining} remaining bytes"),
            ));
        }
        let mut data = vec![0u8; data_size];
        cursor.read_exact(&mut data)?;

        Ok(Self {
            version,
            flags: version_and_flags & 0x00ff_ffff,
            system_id,
            key_ids,
            data,
        })
    }

    /// Key ids as normalized lowercase hex.
    pub fn key_ids_hex(&self) -> Vec<String> {
        self.key_ids.iter().map(hex::encode).collect()
    }

    /// `edef8ba9-79d6-4ace-a3c8-27dcd51d21ed` style system id.
    pub fn system_id_uuid(&self) -> String {
        let hex = hex::encode(self.system_id);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

impl TryFrom<&[u8]> for PsshBox {
    type Error = ManifestError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let (pssh, size) = Self::parse_one(value)?;
        if size != value.len() {
            return Err(ManifestError::MalformedPssh(format!(
                "{} trailing bytes after box",
                value.len() - size
            )));
        }
        Ok(pssh)
    }
}
