//! Evidence file reading with memory mapping for large artifacts.
//!
//! Small files read directly; files past the threshold map into memory
//! so multi-hundred-megabyte productions do not double their footprint
//! during ingestion.

// Memory mapping requires unsafe but is read-only here.
#![allow(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::path::Path;

use memmap2::Mmap;

use crate::{Error, Result};

/// Threshold for using memory mapping (1MB).
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Maximum file size accepted for ingestion (1GB).
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

fn ingest_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Ingest {
        path: path.to_string_lossy().into_owned(),
        reason: reason.to_string(),
    }
}

/// Reads an evidence file to a string, memory-mapping large files.
///
/// # Errors
///
/// Returns an ingest error for missing, oversized, unreadable, or
/// non-UTF-8 files.
pub fn read_evidence_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ingest_error(path, "file not found"));
    }

    let mut file = File::open(path).map_err(|e| ingest_error(path, e))?;
    let size = file.metadata().map_err(|e| ingest_error(path, e))?.len();
    if size > MAX_FILE_SIZE {
        return Err(ingest_error(
            path,
            format!("file too large: {size} bytes (max {MAX_FILE_SIZE})"),
        ));
    }

    if size >= MMAP_THRESHOLD {
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ingest_error(path, e))?;
        std::str::from_utf8(&mmap)
            .map(ToString::to_string)
            .map_err(|e| ingest_error(path, format!("invalid UTF-8: {e}")))
    } else {
        let mut content = String::with_capacity(usize::try_from(size).unwrap_or(0));
        file.read_to_string(&mut content)
            .map_err(|e| ingest_error(path, e))?;
        Ok(content)
    }
}
