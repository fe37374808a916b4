//! Small filesystem helpers shared by the ledger, cache, reporter and mover.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically (write to a sibling temp file, fsync,
/// then rename over the target).
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Move a file, falling back to copy + verify + delete when `rename` fails
/// (e.g. across devices).
///
/// The source is only removed once the copy's content hash matches. A copy
/// that fails part way is removed again unless the destination existed before.
pub fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    let existed = destination.exists();
    if let Err(e) = fs::copy(source, destination) {
        if !existed {
            let _ = fs::remove_file(destination);
        }
        return Err(e);
    }
    let expected = compute_file_hash(source)?;
    let actual = compute_file_hash(destination)?;
    if expected != actual {
        let _ = fs::remove_file(destination);
        return Err(io::Error::other(format!(
            "copy of {} does not match source",
            source.display()
        )));
    }
    fs::remove_file(source)
}

/// SHA256 of the full file contents as lowercase hex.
pub fn compute_file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
