//! Validity registration text format.
//!
//! Each record is a sequence of lines:
//!
//! ```text
//! <path>
//! <algo>:<nix32 nar hash>     (only when hashes are given)
//! <nar size>                  (only when hashes are given)
//! <deriver path or empty>
//! <reference count>
//! <reference path> ...
//! ```
//!
//! An empty path line, or the end of input, ends the stream.

use crate::hash::{Hash, HashAlgorithm};
use crate::path_info::ValidPathInfo;
use crate::store_path::StoreDir;
use std::io::BufRead;

/// Append the registration record for `info` to `out`.
pub fn encode_record(info: &ValidPathInfo, show_derivers: bool, show_hash: bool, out: &mut String) {
    let mut lines = vec![info.path.to_string()];
    if show_hash {
        lines.push(
            info.nar_hash
                .as_ref()
                .map(Hash::to_typed_nix32)
                .unwrap_or_default(),
        );
        lines.push(info.nar_size.to_string());
    }
    lines.push(match (&info.deriver, show_derivers) {
        (Some(deriver), true) => deriver.to_string(),
        _ => String::new(),
    });
    lines.push(info.references.len().to_string());
    lines.extend(info.references.iter().map(|r| r.to_string()));

    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
}

fn read_line(reader: &mut impl BufRead) -> crate::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

fn required_line(reader: &mut impl BufRead) -> crate::Result<String> {
    read_line(reader)?.ok_or_else(|| crate::Error::Parse("missing input".to_string()))
}

fn parse_number<T: std::str::FromStr>(s: &str) -> crate::Result<T> {
    s.trim()
        .parse()
        .map_err(|_| crate::Error::Parse(format!("number expected, got '{s}'")))
}

/// Decode the next record from `reader`.
///
/// Returns `Ok(None)` at the end of the stream, signalled either by an empty
/// path line or by running out of input before a record starts.
pub fn decode_valid_path_info(
    store: &StoreDir,
    reader: &mut impl BufRead,
    hash_given: bool,
) -> crate::Result<Option<ValidPathInfo>> {
    let path = match read_line(reader)? {
        Some(line) if !line.is_empty() => store.parse_path(&line)?,
        _ => return Ok(None),
    };
    let mut info = ValidPathInfo::new(path);

    if hash_given {
        let hash_line = required_line(reader)?;
        let hash = if hash_line.contains(':') {
            Hash::parse_typed(&hash_line)?
        } else {
            Hash::parse_with_algorithm(HashAlgorithm::Sha256, &hash_line)?
        };
        info.nar_hash = Some(hash);
        info.nar_size = parse_number(&required_line(reader)?)?;
    }

    let deriver = required_line(reader)?;
    if !deriver.is_empty() {
        info.deriver = Some(store.parse_path(&deriver)?);
    }

    let count: usize = parse_number(&required_line(reader)?)?;
    for _ in 0..count {
        let reference = required_line(reader)?;
        info.references.insert(store.parse_path(&reference)?);
    }

    Ok(Some(info))
}

/// Decode every record in `reader`.
pub fn decode_registration(
    store: &StoreDir,
    reader: &mut impl BufRead,
    hash_given: bool,
) -> crate::Result<Vec<ValidPathInfo>> {
    let mut infos = Vec::new();
    while let Some(info) = decode_valid_path_info(store, reader, hash_given)? {
        infos.push(info);
    }
    Ok(infos)
}
