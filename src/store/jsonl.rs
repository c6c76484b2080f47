//! Append-only JSONL log primitives shared by the node/result/queue logs.
//!
//! Each line is one `serde_json`-encoded record. Appends open the file with
//! `create(true).append(true)` and fsync-free `write_all` + newline, which is
//! sufficient for crash-safety at the line boundary: a torn write leaves a
//! trailing partial line, which readers must tolerate rather than reject.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Append a single record as one line to `path`, creating the file (and its
/// parent directory) if necessary.
pub fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = open_append(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    file.flush()?;
    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)
}

/// Read every well-formed line in `path` as a `T`, skipping (and logging) any
/// line that fails to parse — a malformed trailing line from a torn write
/// must not make the rest of the log unreadable. Returns an empty vec if the
/// file does not exist yet.
pub fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => out.push(record),
            Err(err) => {
                skipped += 1;
                tracing::warn!(
                    path = %path.display(),
                    line = idx,
                    error = %err,
                    "skipping malformed jsonl line"
                );
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "tolerated malformed jsonl lines");
    }

    Ok(out)
}

/// Atomically overwrite `path` with the serialized form of `value`: write to
/// a sibling temp file then rename over the target, so a reader never
/// observes a partially-written document.
pub fn write_whole<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read the whole-document JSON at `path`, or `None` if it does not exist.
pub fn read_whole<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let body = fs::read_to_string(path)?;
    let value = serde_json::from_str(&body)?;
    Ok(Some(value))
}
