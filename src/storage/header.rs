use crate::error::{PatchLogError, StoreResult};
use crate::types::Version;

pub const SEGMENT_MAGIC_NUM: u32 = 0x_5041_5443;
pub const SEGMENT_FORMAT_V1: u32 = 1;
pub const SEGMENT_HEADER_SIZE: usize = 24; // 4 + 4 + 8 + 4 + 4
/// Largest payload the 32-bit size field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Reject payloads whose length does not fit the header.
pub fn check_payload_len(len: usize) -> StoreResult<()> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(PatchLogError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

/// Fixed header in front of every segment payload.
///
/// Layout (little endian): magic | format | version | payload size | payload crc32
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic_num: u32,
    pub format: u32,
    pub version: Version,
    pub size: u32,
    pub crc: u32,
}

impl SegmentHeader {
    pub fn for_payload(version: Version, payload: &[u8]) -> Self {
        Self {
            magic_num: SEGMENT_MAGIC_NUM,
            format: SEGMENT_FORMAT_V1,
            version,
            size: payload.len() as u32,
            crc: crc32fast::hash(payload),
        }
    }

    pub fn serialize(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic_num.to_le_bytes());
        buf[4..8].copy_from_slice(&self.format.to_le_bytes());
        buf[8..16].copy_from_slice(&self.version.value().to_le_bytes());
        buf[16..20].copy_from_slice(&self.size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    /// Parse a header. Returns a reason string on malformed input; callers
    /// attach the file path.
    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(format!("short header: {} bytes", data.len()));
        }

        let u32_at = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[at..at + 4]);
            u32::from_le_bytes(bytes)
        };

        let magic_num = u32_at(0);
        if magic_num != SEGMENT_MAGIC_NUM {
            return Err(format!("invalid magic number {:#x}", magic_num));
        }
        let format = u32_at(4);
        if format != SEGMENT_FORMAT_V1 {
            return Err(format!("unsupported segment format {}", format));
        }

        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(&data[8..16]);

        Ok(Self {
            magic_num,
            format,
            version: Version::new(u64::from_le_bytes(version_bytes)),
            size: u32_at(16),
            crc: u32_at(20),
        })
    }
}

/// Encode a full segment file body.
pub fn encode_segment(version: Version, payload: &[u8]) -> Vec<u8> {
    let header = SegmentHeader::for_payload(version, payload);
    let mut buf = Vec::with_capacity(SEGMENT_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.serialize());
    buf.extend_from_slice(payload);
    buf
}

/// Check a segment file body against the version it was read for and return
/// the payload.
pub fn decode_segment(
    path: &std::path::Path,
    expected: Version,
    mut data: Vec<u8>,
) -> StoreResult<Vec<u8>> {
    let header =
        SegmentHeader::deserialize(&data).map_err(|reason| PatchLogError::corrupt(path, reason))?;

    if header.version != expected {
        return Err(PatchLogError::corrupt(
            path,
            format!("holds version {}, expected {}", header.version, expected),
        ));
    }

    let payload_len = data.len() - SEGMENT_HEADER_SIZE;
    if payload_len != header.size as usize {
        return Err(PatchLogError::corrupt(
            path,
            format!("payload is {} bytes, header says {}", payload_len, header.size),
        ));
    }

    let payload = data.split_off(SEGMENT_HEADER_SIZE);
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != header.crc {
        return Err(PatchLogError::corrupt(
            path,
            format!("crc mismatch: expected {}, got {}", header.crc, actual_crc),
        ));
    }

    Ok(payload)
}
