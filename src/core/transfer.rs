//! Single-file copy with collision-safe naming and post-copy verification.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::checksum::{self, CHUNK_SIZE};
use crate::core::models::Digest;
use crate::error::{Error, Result};

/// Verification failures are retried this many times before giving up.
pub const VERIFY_RETRIES: u32 = 1;

const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Moves bytes from a source file into an already reserved destination path.
pub trait CopyEngine: Send + Sync {
    /// Copy `source` to `dest`, returning the number of bytes written.
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<u64>;
}

/// Buffered copy that preserves permissions and timestamps.
pub struct NativeCopy {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
}

impl Default for NativeCopy {
    fn default() -> Self {
        Self { sync_files: true }
    }
}

impl CopyEngine for NativeCopy {
    fn copy_file(&self, source: &Path, dest: &Path) -> Result<u64> {
        let source_metadata = fs::metadata(source).map_err(|e| Error::io(source, e))?;

        let source_file = File::open(source).map_err(|e| Error::io(source, e))?;
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, source_file);

        let dest_file = File::create(dest).map_err(|e| Error::io(dest, e))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, dest_file);

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut bytes_written: u64 = 0;

        loop {
            let bytes_read = reader.read(&mut buffer).map_err(|e| Error::io(source, e))?;
            if bytes_read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..bytes_read])
                .map_err(|e| Error::io(dest, e))?;
            bytes_written += bytes_read as u64;
        }

        writer.flush().map_err(|e| Error::io(dest, e))?;

        if self.sync_files {
            let inner = writer
                .into_inner()
                .map_err(|e| Error::io(dest, io::Error::new(e.error().kind(), e.to_string())))?;
            inner.sync_all().map_err(|e| Error::io(dest, e))?;
        }

        // Some filesystems (exFAT, FAT32) reject these; the content is what matters.
        if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
            debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
        }
        if let Err(e) = preserve_timestamps(&source_metadata, dest) {
            debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
        }

        Ok(bytes_written)
    }
}

fn preserve_timestamps(source_metadata: &fs::Metadata, dest: &Path) -> io::Result<()> {
    let atime = filetime::FileTime::from_last_access_time(source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(source_metadata);
    filetime::set_file_times(dest, atime, mtime)
}

/// Candidate names for `file_name` in order: as-is, then suffixed with the
/// digest prefix, then with the digest prefix and a counter.
fn candidate_name(file_name: &str, digest: &Digest, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    if attempt == 1 {
        format!("{}_{}{}", stem, digest.short(), ext)
    } else {
        format!("{}_{}_{}{}", stem, digest.short(), attempt - 1, ext)
    }
}

/// Claim a destination path inside `dir` that no other file occupies.
///
/// The file is created empty with `create_new`, so two workers can never be
/// handed the same path and an existing file is never overwritten.
pub fn reserve_destination(dir: &Path, file_name: &str, digest: &Digest) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(candidate_name(file_name, digest, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::io(candidate, e)),
        }
    }

    Err(Error::io(
        dir.join(file_name),
        io::Error::new(ErrorKind::AlreadyExists, "no free destination name"),
    ))
}

/// Re-hash `dest` and compare with the source digest. Returns the verified
/// length of the destination file.
pub fn verify_copy(dest: &Path, expected: &Digest) -> Result<u64> {
    let actual = checksum::digest_file(dest)?;
    if actual != *expected {
        return Err(Error::Verification {
            path: dest.to_path_buf(),
            expected: *expected,
            actual,
        });
    }

    let len = fs::metadata(dest).map_err(|e| Error::io(dest, e))?.len();
    Ok(len)
}

/// A copy that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedCopy {
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub attempts: u32,
}

/// Copy `source` into `dir`, verify it, and retry once on a digest mismatch.
///
/// Any destination left behind by a failed attempt is deleted.
pub fn copy_verified(
    engine: &dyn CopyEngine,
    source: &Path,
    dir: &Path,
    digest: &Digest,
) -> Result<VerifiedCopy> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| digest.to_hex());

    let mut attempt = 0;
    loop {
        attempt += 1;
        let dest = reserve_destination(dir, &file_name, digest)?;

        let outcome = engine
            .copy_file(source, &dest)
            .and_then(|_| verify_copy(&dest, digest));

        match outcome {
            Ok(size_bytes) => {
                return Ok(VerifiedCopy {
                    destination: dest,
                    size_bytes,
                    attempts: attempt,
                });
            }
            Err(e) => {
                discard(&dest);
                if matches!(e, Error::Verification { .. }) && attempt <= VERIFY_RETRIES {
                    warn!(source = %source.display(), error = %e, "Verification failed, retrying copy");
                    continue;
                }
                return Err(e);
            }
        }
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial copy");
        }
    }
}

/// Check if an I/O error indicates the device has been removed
pub fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::NotFound => true,
        ErrorKind::PermissionDenied => false,
        ErrorKind::BrokenPipe => true,
        ErrorKind::ConnectionReset => true,
        ErrorKind::ConnectionAborted => true,
        ErrorKind::NotConnected => true,
        _ => {
            if let Some(os_error) = error.raw_os_error() {
                matches!(
                    os_error,
                    libc::EIO
                        | libc::ENODEV
                        | libc::ENXIO
                        | libc::ENOMEDIUM
                        | libc::EMEDIUMTYPE
                )
            } else {
                false
            }
        }
    }
}
