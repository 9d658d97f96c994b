use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use crate::model::ScanMode;

/// Hex width of every fingerprint, quick or full.
pub const FINGERPRINT_HEX_LEN: usize = 64;

const READ_BUFFER_BYTES: usize = 64 * 1024;
const QUICK_CONTEXT: &str = "copy-ledger 2026-01 quick fingerprint v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub mode: ScanMode,
}

/// Streams `reader` through blake3 in fixed-size chunks.
pub fn hash_reader<R: Read>(reader: R) -> io::Result<String> {
    let never = AtomicBool::new(false);
    match hash_reader_cancellable(reader, &never)? {
        Some(hash) => Ok(hash),
        None => Err(io::Error::new(io::ErrorKind::Interrupted, "hash cancelled")),
    }
}

/// Like [`hash_reader`], but gives up between chunks once `cancel` is set.
/// Returns `None` when cancelled.
pub fn hash_reader_cancellable<R: Read>(
    mut reader: R,
    cancel: &AtomicBool,
) -> io::Result<Option<String>> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Some(hasher.finalize().to_hex().to_string()))
}

/// Fingerprint over size, mtime and the first `sample_bytes` of content.
///
/// Uses blake3's derive-key mode so a quick fingerprint never equals the
/// full fingerprint of any file.
pub fn quick_fingerprint<R: Read>(
    reader: R,
    size: u64,
    modified: Option<DateTime<Utc>>,
    sample_bytes: u64,
) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new_derive_key(QUICK_CONTEXT);
    hasher.update(&size.to_le_bytes());
    match modified {
        Some(time) => {
            hasher.update(&[1]);
            hasher.update(&time.timestamp().to_le_bytes());
            hasher.update(&time.timestamp_subsec_nanos().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }

    let mut sample = reader.take(sample_bytes);
    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];
    loop {
        let bytes_read = match sample.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Fingerprints one file for `mode`.
///
/// Quick mode hashes files no larger than the sample in full and tags them
/// `Full`, since the sample already covers every byte. Returns `None` when
/// cancelled mid-file.
pub fn fingerprint_file(
    path: &Path,
    size: u64,
    modified: Option<DateTime<Utc>>,
    mode: ScanMode,
    sample_bytes: u64,
    cancel: &AtomicBool,
) -> io::Result<Option<Fingerprint>> {
    let reader = BufReader::new(File::open(path)?);

    if mode == ScanMode::Quick && size > sample_bytes {
        let hash = quick_fingerprint(reader, size, modified, sample_bytes)?;
        return Ok(Some(Fingerprint {
            hash,
            mode: ScanMode::Quick,
        }));
    }

    Ok(hash_reader_cancellable(reader, cancel)?.map(|hash| Fingerprint {
        hash,
        mode: ScanMode::Full,
    }))
}
