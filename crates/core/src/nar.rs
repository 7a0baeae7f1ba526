//! NAR (Nix ARchive) dump and restore over the filesystem.
//!
//! The wire format itself is handled by `nix_compat`; this module walks the
//! filesystem, applies a [`PathFilter`] and recreates trees from archives.

use nix_compat::nar::{reader, writer};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Predicate deciding whether a filesystem entry is included in a dump.
pub type PathFilter = dyn Fn(&Path) -> bool;

/// A filter that accepts everything.
pub fn accept_all(_: &Path) -> bool {
    true
}

/// Serialise the filesystem object at `path` into `sink`.
pub fn dump_path(
    path: &Path,
    filter: &PathFilter,
    sink: &mut (impl Write + Send),
) -> crate::Result<()> {
    let node = writer::open(sink)?;
    dump_node(path, filter, node)
}

fn dump_node(path: &Path, filter: &PathFilter, node: writer::Node<'_, '_>) -> crate::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        node.symlink(target.as_os_str().as_encoded_bytes())?;
    } else if file_type.is_file() {
        let mut contents = BufReader::new(fs::File::open(path)?);
        node.file(is_executable(&meta), meta.len(), &mut contents)
            .map_err(|e| {
                crate::Error::Nar(format!("cannot dump '{}': {e}", path.display()))
            })?;
    } else if file_type.is_dir() {
        let mut names: Vec<_> = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<io::Result<_>>()?;
        names.sort();

        let mut dir = node.directory()?;
        for name in names {
            let child = path.join(&name);
            if !filter(&child) {
                continue;
            }
            dump_node(&child, filter, dir.entry(name.as_encoded_bytes())?)?;
        }
        dir.close()?;
    } else {
        return Err(crate::Error::Nar(format!(
            "file '{}' has an unsupported type",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

/// Recreate the filesystem object serialised in `source` at `target`.
///
/// `target` must not exist yet.
pub fn restore_path(mut source: impl BufRead + Send, target: &Path) -> crate::Result<()> {
    let node = reader::open(&mut source).map_err(malformed)?;
    restore_node(node, target)
}

fn malformed(e: io::Error) -> crate::Error {
    crate::Error::Nar(format!("malformed archive: {e}"))
}

fn restore_node(node: reader::Node<'_, '_>, target: &Path) -> crate::Result<()> {
    match node {
        reader::Node::Symlink { target: link } => make_symlink(&link, target)?,
        reader::Node::File {
            executable,
            mut reader,
        } => {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(target)?;
            io::copy(&mut reader, &mut file).map_err(malformed)?;
            if executable {
                set_executable(target)?;
            }
        }
        reader::Node::Directory(mut dir) => {
            fs::create_dir(target)?;
            while let Some(entry) = dir.next().map_err(malformed)? {
                let name: &[u8] = entry.name.as_ref();
                if name == b"." || name == b".." || name.contains(&b'/') {
                    return Err(crate::Error::Nar(format!(
                        "invalid entry name '{}'",
                        String::from_utf8_lossy(name)
                    )));
                }
                let name = std::str::from_utf8(name)
                    .map_err(|_| crate::Error::Nar("entry name is not UTF-8".to_string()))?;
                let child = target.join(name);
                restore_node(entry.node, &child)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(link: &[u8], target: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(link), target)
}

#[cfg(not(unix))]
fn make_symlink(_link: &[u8], _target: &Path) -> io::Result<()> {
    Err(io::Error::other("symlinks are not supported on this platform"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(path: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        dump_path(path, &accept_all, &mut out).unwrap();
        out
    }

    #[test]
    fn test_regular_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello");
        fs::write(&file, b"hi").unwrap();

        let nar = dump(&file);
        // magic, "(", "type", "regular", "contents", 8-byte length + padded body, ")"
        assert_eq!(&nar[..8], &13u64.to_le_bytes());
        assert_eq!(&nar[8..21], b"nix-archive-1");
        assert_eq!(nar.len() % 8, 0);
        assert!(nar.windows(2).any(|w| w == b"hi"));
    }

    #[test]
    fn test_dump_restore_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("b.txt"), b"second").unwrap();
        fs::write(src.join("a.txt"), b"first file").unwrap();
        fs::create_dir(src.join("sub")).unwrap();
        fs::write(src.join("sub/inner"), b"").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("a.txt", src.join("link")).unwrap();

        let nar = dump(&src);
        let dst = dir.path().join("dst");
        restore_path(nar.as_slice(), &dst).unwrap();

        assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"first file");
        assert_eq!(fs::read(dst.join("b.txt")).unwrap(), b"second");
        assert_eq!(fs::read(dst.join("sub/inner")).unwrap(), b"");
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(dst.join("link")).unwrap(),
            Path::new("a.txt")
        );
        assert_eq!(dump(&dst), nar);
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_survives() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let nar = dump(&script);
        assert!(nar.windows(10).any(|w| w == b"executable"));
        let restored = dir.path().join("restored");
        restore_path(nar.as_slice(), &restored).unwrap();
        assert_ne!(fs::metadata(&restored).unwrap().permissions().mode() & 0o100, 0);
    }

    #[test]
    fn test_filter_excludes_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep"), b"1").unwrap();
        fs::write(dir.path().join("skip"), b"2").unwrap();

        let mut filtered = Vec::new();
        let filter = |p: &Path| p.file_name().is_some_and(|n| n != "skip");
        dump_path(dir.path(), &filter, &mut filtered).unwrap();
        assert!(filtered.len() < dump(dir.path()).len());
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let result = restore_path(&b"not a nar"[..], &dir.path().join("out"));
        assert!(matches!(result, Err(crate::Error::Nar(_))));
    }
}
