//! Framed scenario archive.
//!
//! Layout:
//! ```text
//! [magic: 4 bytes "SIMV"][version: 1 byte]
//! [header length: 4 bytes LE][header: N bytes JSON][crc32: 4 bytes LE]
//! [payload length: 4 bytes LE][payload: M bytes][crc32: 4 bytes LE]
//! ```
//! The header records session-level context (scenario, clock, schedule);
//! the payload is the engine's own model document.

use std::io::{Cursor, Read};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::engine::ScenarioDescriptor;
use crate::error::SessionError;
use crate::integrator::Integrator;
use crate::time::SimTime;

/// Current archive version.
const ARCHIVE_VERSION: u8 = 1;

/// Magic bytes identifying a simverify archive.
pub const MAGIC: [u8; 4] = *b"SIMV";

/// Frames larger than this are rejected before allocation.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Session context stored alongside the engine payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Scenario the payload was written from.
    pub descriptor: ScenarioDescriptor,
    /// Integrator selected at write time.
    pub integrator: Integrator,
    /// Max step size, if the session set one.
    pub max_step: Option<SimTime>,
    /// Simulation time of the written state.
    pub time: SimTime,
    /// Installed breakpoints.
    pub breakpoints: Vec<SimTime>,
    /// Precision the payload was written at.
    pub precision: String,
}

fn corrupt(reason: impl Into<String>) -> SessionError {
    SessionError::CorruptOrIncompatibleFormat {
        reason: reason.into(),
    }
}

fn push_frame(out: &mut Vec<u8>, data: &[u8]) -> Result<(), SessionError> {
    let len = u32::try_from(data.len()).map_err(|_| corrupt("frame too large"))?;
    let mut hasher = Hasher::new();
    hasher.update(data);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(())
}

fn read_frame(reader: &mut impl Read, what: &str) -> Result<Vec<u8>, SessionError> {
    let truncated = |_| corrupt(format!("truncated {what}"));

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).map_err(truncated)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(corrupt(format!("{what} size {len} exceeds maximum {MAX_FRAME_SIZE}")));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).map_err(truncated)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes).map_err(truncated)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(corrupt(format!(
            "{what} CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }
    Ok(data)
}

/// Encode a header and engine payload.
///
/// # Errors
///
/// Returns `CorruptOrIncompatibleFormat` if a frame cannot be encoded.
pub fn encode(header: &ArchiveHeader, payload: &[u8]) -> Result<Vec<u8>, SessionError> {
    let header_bytes = serde_json::to_vec(header).map_err(|e| corrupt(format!("encode header: {e}")))?;
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + header_bytes.len() + payload.len() + 16);
    out.extend_from_slice(&MAGIC);
    out.push(ARCHIVE_VERSION);
    push_frame(&mut out, &header_bytes)?;
    push_frame(&mut out, payload)?;
    Ok(out)
}

/// Decode and verify an archive.
///
/// # Errors
///
/// Returns `CorruptOrIncompatibleFormat` on bad magic, an unsupported
/// version, a truncated or checksum-failing frame, an undecodable header,
/// or trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<(ArchiveHeader, Vec<u8>), SessionError> {
    let mut reader = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|_| corrupt("truncated magic"))?;
    if magic != MAGIC {
        return Err(corrupt(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version).map_err(|_| corrupt("truncated version"))?;
    if version[0] != ARCHIVE_VERSION {
        return Err(corrupt(format!(
            "unsupported archive version: {} (expected {ARCHIVE_VERSION})",
            version[0]
        )));
    }

    let header_bytes = read_frame(&mut reader, "header")?;
    let header: ArchiveHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| corrupt(format!("decode header: {e}")))?;
    let payload = read_frame(&mut reader, "payload")?;

    let consumed = usize::try_from(reader.position()).unwrap_or(usize::MAX);
    if consumed != bytes.len() {
        return Err(corrupt(format!("{} trailing bytes", bytes.len().saturating_sub(consumed))));
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ArchiveHeader {
        ArchiveHeader {
            descriptor: ScenarioDescriptor::new("TetBeam3d"),
            integrator: Integrator::Trapezoidal,
            max_step: Some(SimTime::from_millis(5)),
            time: SimTime::from_millis(250),
            breakpoints: vec![SimTime::from_millis(500)],
            precision: "%.10g".to_string(),
        }
    }

    fn reason(err: SessionError) -> String {
        match err {
            SessionError::CorruptOrIncompatibleFormat { reason } => reason,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn encode_decode() {
        let bytes = encode(&header(), b"payload").unwrap();
        assert_eq!(&bytes[..4], b"SIMV");
        let (h, p) = decode(&bytes).unwrap();
        assert_eq!(h, header());
        assert_eq!(p, b"payload");
    }

    #[test]
    fn every_single_byte_corruption_is_detected() {
        let bytes = encode(&header(), b"payload").unwrap();
        for i in 0..bytes.len() {
            let mut bad = bytes.clone();
            bad[i] ^= 0x40;
            assert!(decode(&bad).is_err(), "corruption at byte {i} not detected");
        }
    }

    #[test]
    fn bad_magic_and_version() {
        let mut bytes = encode(&header(), b"x").unwrap();
        bytes[0] = b'X';
        assert!(reason(decode(&bytes).unwrap_err()).contains("magic"));

        let mut bytes = encode(&header(), b"x").unwrap();
        bytes[4] = 9;
        assert!(reason(decode(&bytes).unwrap_err()).contains("version"));
    }

    #[test]
    fn truncation_and_trailing_bytes() {
        let bytes = encode(&header(), b"payload").unwrap();
        assert!(reason(decode(&bytes[..bytes.len() - 1]).unwrap_err()).contains("truncated"));
        let mut long = bytes;
        long.push(0);
        assert!(reason(decode(&long).unwrap_err()).contains("trailing"));
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(ARCHIVE_VERSION);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(reason(decode(&bytes).unwrap_err()).contains("exceeds maximum"));
    }
}
