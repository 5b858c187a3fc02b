//! Byte-level splitting of a single file into numbered parts no larger than a ceiling.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ChunkError;
use crate::model::Split;

/// Path of part `n` (1-based) of `path`: `name.ext` becomes `name.partN.ext`.
pub fn part_path(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.part{n}{ext}"))
}

/// Splits `path` into parts of at most `ceiling` bytes, written next to it.
///
/// Files that already fit are returned untouched as [`Split::Whole`]. The
/// concatenation of the returned parts is byte-identical to the input and the
/// last part is never empty.
pub fn split_file(path: &Path, ceiling: u64) -> Result<Split, ChunkError> {
    if ceiling == 0 {
        return Err(ChunkError::ZeroCeiling);
    }
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ChunkError::Io { path, source }
    };

    let mut source = File::open(path).map_err(io_err(path))?;
    let size = source.metadata().map_err(io_err(path))?.len();
    if size <= ceiling {
        return Ok(Split::Whole(path.to_path_buf()));
    }

    let mut parts = Vec::new();
    if let Err(e) = write_parts(path, &mut source, ceiling, &mut parts) {
        for part in &parts {
            let _ = fs::remove_file(part);
        }
        return Err(e);
    }

    info!(file = %path.display(), parts = parts.len(), "[CHUNK] File split");
    Ok(Split::Parts(parts))
}

fn write_parts(path: &Path, source: &mut File, ceiling: u64, parts: &mut Vec<PathBuf>) -> Result<(), ChunkError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ChunkError::Io { path, source }
    };
    let mut n = 1;
    loop {
        let part = part_path(path, n);
        let mut out = File::create(&part).map_err(io_err(&part))?;
        parts.push(part.clone());
        let mut limited = (&mut *source).take(ceiling);
        let written = io::copy(&mut limited, &mut out).map_err(io_err(&part))?;
        drop(out);
        if written == 0 {
            parts.pop();
            fs::remove_file(&part).map_err(io_err(&part))?;
            return Ok(());
        }
        debug!(part = %part.display(), bytes = written, "[CHUNK] Wrote part");
        n += 1;
        if written < ceiling {
            return Ok(());
        }
    }
}
