//! Daemon wire protocol: one JSON object per line in each direction.

use crate::error::{StoreError, StoreResult};
use base64::Engine;
use depot_core::path_info::PathInfoRecord;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    IsValidPath {
        path: String,
    },
    QueryPathInfo {
        path: String,
    },
    NarFromPath {
        path: String,
    },
    AddToStore {
        info: PathInfoRecord,
        /// Base64-encoded NAR.
        nar: String,
        repair: bool,
    },
    AddSignatures {
        path: String,
        sigs: Vec<String>,
    },
    QueryAllValidPaths,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Valid { valid: bool },
    PathInfo { info: Option<PathInfoRecord> },
    Nar { nar: String },
    Paths { paths: Vec<String> },
    Done,
    Error { message: String },
}

pub fn encode_nar(nar: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(nar)
}

pub fn decode_nar(nar: &str) -> StoreResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(nar)
        .map_err(|e| StoreError::Protocol(format!("invalid NAR encoding: {e}")))
}

/// Write `message` as a single line and flush.
pub fn write_message<T: Serialize>(writer: &mut impl Write, message: &T) -> StoreResult<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Read the next message, or `None` when the peer has closed the connection.
pub fn read_message<T: for<'de> Deserialize<'de>>(
    reader: &mut impl BufRead,
) -> StoreResult<Option<T>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_wire_shape() {
        let request = Request::IsValidPath {
            path: "/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-x".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"op":"is_valid_path","path":"/nix/store/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-x"}"#
        );
        assert_eq!(
            serde_json::to_string(&Request::QueryAllValidPaths).unwrap(),
            r#"{"op":"query_all_valid_paths"}"#
        );
    }

    #[test]
    fn test_messages_are_line_delimited() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Response::Done).unwrap();
        write_message(&mut buf, &Response::Valid { valid: true }).unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 2);

        let mut reader = Cursor::new(buf);
        assert_eq!(read_message::<Response>(&mut reader).unwrap(), Some(Response::Done));
        assert_eq!(
            read_message::<Response>(&mut reader).unwrap(),
            Some(Response::Valid { valid: true })
        );
        assert_eq!(read_message::<Response>(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let mut reader = Cursor::new(b"not json\n".to_vec());
        assert!(read_message::<Request>(&mut reader).is_err());
        assert!(decode_nar("***").is_err());
    }
}
