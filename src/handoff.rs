//! Binary codec for the cross-process launch handoff.
//!
//! A non-primary launch serializes its command line, environment block,
//! working directory and show command, and delivers the buffer to the primary
//! instance over WM_COPYDATA. Sender and receiver are always the same build,
//! so there is no version tag and no compression.
//!
//! Wire format, in field order:
//! `[u32 len][UTF-16LE bytes]` for the command line, the environment block
//! and the working directory, followed by one raw little-endian `u32` show
//! command. Lengths count UTF-16 code units, not bytes.

use thiserror::Error;

/// Launch request forwarded from a secondary launch to the primary instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPayload {
    pub command_line: String,
    /// Environment entries, each terminated by a single NUL (see
    /// [`env_block_from_wide`]).
    pub environment: String,
    pub working_directory: String,
    pub show_command: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("handoff payload truncated while reading {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("handoff payload field {field} is not valid UTF-16")]
    InvalidUtf16 { field: &'static str },
}

/// Serializes a payload to the wire format. Exact inverse of [`decode`].
pub fn encode(payload: &HandoffPayload) -> Vec<u8> {
    let mut out = Vec::new();
    write_string(&mut out, &payload.command_line);
    write_string(&mut out, &payload.environment);
    write_string(&mut out, &payload.working_directory);
    out.extend_from_slice(&payload.show_command.to_le_bytes());
    out
}

/// Parses a payload, validating at every step that the buffer still covers
/// the declared lengths. Never reads past the end of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<HandoffPayload, CodecError> {
    let mut reader = Reader { buf: bytes };
    Ok(HandoffPayload {
        command_line: reader.read_string("command line")?,
        environment: reader.read_string("environment block")?,
        working_directory: reader.read_string("working directory")?,
        show_command: reader.read_u32("show command")?,
    })
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    out.extend_from_slice(&(units.len() as u32).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        if self.buf.len() < 4 {
            return Err(CodecError::Truncated {
                field,
                needed: 4,
                remaining: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(4);
        self.buf = rest;
        Ok(u32::from_le_bytes([head[0], head[1], head[2], head[3]]))
    }

    fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let units = self.read_u32(field)? as usize;
        let byte_len = units.checked_mul(2).ok_or(CodecError::Truncated {
            field,
            needed: usize::MAX,
            remaining: self.buf.len(),
        })?;
        if self.buf.len() < byte_len {
            return Err(CodecError::Truncated {
                field,
                needed: byte_len,
                remaining: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(byte_len);
        self.buf = rest;
        let wide: Vec<u16> = head
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&wide).map_err(|_| CodecError::InvalidUtf16 { field })
    }
}

/// Collects a double-NUL-terminated block of wide strings into a single
/// string where every entry keeps its single trailing NUL. The element count
/// is discovered by walking, never assumed.
pub fn env_block_from_wide(block: &[u16]) -> String {
    let mut out = String::new();
    let mut pos = 0;
    while pos < block.len() && block[pos] != 0 {
        let end = block[pos..]
            .iter()
            .position(|&unit| unit == 0)
            .map(|offset| pos + offset)
            .unwrap_or(block.len());
        out.push_str(&String::from_utf16_lossy(&block[pos..end]));
        out.push('\0');
        pos = end + 1;
    }
    out
}

/// Snapshot of the current process environment in handoff block form.
#[cfg(windows)]
pub fn capture_environment_block() -> String {
    use windows::core::PCWSTR;
    use windows::Win32::System::Environment::{FreeEnvironmentStringsW, GetEnvironmentStringsW};

    unsafe {
        let raw = GetEnvironmentStringsW();
        if raw.0.is_null() {
            return String::new();
        }
        let mut len = 0usize;
        while !(*raw.0.add(len) == 0 && *raw.0.add(len + 1) == 0) {
            len += 1;
        }
        let block = std::slice::from_raw_parts(raw.0, len + 2);
        let out = env_block_from_wide(block);
        let _ = FreeEnvironmentStringsW(PCWSTR(raw.0));
        out
    }
}

#[cfg(not(windows))]
pub fn capture_environment_block() -> String {
    let mut out = String::new();
    for (key, value) in std::env::vars() {
        out.push_str(&key);
        out.push('=');
        out.push_str(&value);
        out.push('\0');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HandoffPayload {
        HandoffPayload {
            command_line: "emp new-tab -p \"PowerShell\"".to_string(),
            environment: "PATH=C:\\bin\0HOME=C:\\Users\\u\0".to_string(),
            working_directory: "C:\\Users\\u\\src".to_string(),
            show_command: 5,
        }
    }

    #[test]
    fn round_trip() {
        let payload = sample();
        let decoded = decode(&encode(&payload)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_non_ascii() {
        let payload = HandoffPayload {
            command_line: "emp --title \u{1F980} crab".to_string(),
            environment: "GR\u{00DC}N=ja\0".to_string(),
            working_directory: "C:\\\u{6F22}\u{5B57}".to_string(),
            show_command: 1,
        };
        assert_eq!(decode(&encode(&payload)).unwrap(), payload);
    }

    #[test]
    fn known_payload_round_trips_exactly() {
        let payload = HandoffPayload {
            command_line: "wt -w 0".to_string(),
            environment: "A=1\0\0".to_string(),
            working_directory: "C:\\Users".to_string(),
            show_command: 1,
        };
        let bytes = encode(&payload);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.command_line, "wt -w 0");
        assert_eq!(decoded.environment, "A=1\0\0");
        assert_eq!(decoded.working_directory, "C:\\Users");
        assert_eq!(decoded.show_command, 1);
        // re-encoding the decoded payload reproduces the wire bytes
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn every_truncated_prefix_fails_cleanly() {
        let bytes = encode(&sample());
        for cut in 0..bytes.len() {
            match decode(&bytes[..cut]) {
                Err(CodecError::Truncated { .. }) => {}
                other => panic!("prefix of {cut} bytes produced {other:?}"),
            }
        }
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn declared_length_beyond_buffer_is_rejected() {
        // a single string claiming u32::MAX code units
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn unpaired_surrogate_is_invalid_utf16() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0xD800u16.to_le_bytes()); // lone high surrogate
        for _ in 0..2 {
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            decode(&bytes),
            Err(CodecError::InvalidUtf16 {
                field: "command line"
            })
        );
    }

    #[test]
    fn env_block_walks_to_double_nul() {
        let block: Vec<u16> = "A=1\0B=2\0\0extra-garbage".encode_utf16().collect();
        assert_eq!(env_block_from_wide(&block), "A=1\0B=2\0");
    }

    #[test]
    fn empty_env_block() {
        assert_eq!(env_block_from_wide(&[0, 0]), "");
        assert_eq!(env_block_from_wide(&[]), "");
    }
}
