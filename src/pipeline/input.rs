//! Input validation: turn a path or an in-memory upload into a checked,
//! readable PDF file on disk.
//!
//! pdfium and the native-text layer both need a file path, so uploaded bytes
//! are spooled to a named temp file that lives as long as the
//! [`ResolvedInput`]. Every input is checked for the `%PDF` magic and the
//! size limit before any rendering starts.

use crate::error::ExtractError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A validated PDF on disk.
#[derive(Debug)]
pub enum ResolvedInput {
    /// The caller's own file.
    Local(PathBuf),
    /// Uploaded bytes spooled to a temp file, removed on drop.
    Spooled { path: PathBuf, _file: NamedTempFile },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Spooled { path, .. } => path,
        }
    }
}

/// Validate a local file: existence, permissions, size, and magic bytes.
pub fn resolve_local(path: &Path, max_file_size: u64) -> Result<ResolvedInput, ExtractError> {
    let path = path.to_path_buf();

    let meta = match std::fs::metadata(&path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(ExtractError::FileNotFound { path }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path })
        }
        Err(_) => return Err(ExtractError::FileNotFound { path }),
    };

    if meta.len() > max_file_size {
        return Err(ExtractError::FileTooLarge {
            path,
            size: meta.len(),
            limit: max_file_size,
        });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path })
        }
        Err(_) => return Err(ExtractError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).unwrap_or(0);
    if read < 4 || &magic != PDF_MAGIC {
        return Err(ExtractError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Validate uploaded bytes and spool them to a temp file.
///
/// `filename` only labels errors; it is never used as a path.
pub fn spool_bytes(
    bytes: &[u8],
    filename: &str,
    max_file_size: u64,
) -> Result<ResolvedInput, ExtractError> {
    let label = PathBuf::from(filename);
    if bytes.len() as u64 > max_file_size {
        return Err(ExtractError::FileTooLarge {
            path: label,
            size: bytes.len() as u64,
            limit: max_file_size,
        });
    }
    if bytes.len() < 4 || &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ExtractError::NotAPdf { path: label, magic });
    }

    let mut file = tempfile::Builder::new()
        .prefix("pdfocr-upload-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ExtractError::Internal(format!("Failed to create temp file: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ExtractError::Internal(format!("Failed to write temp file: {e}")))?;

    let path = file.path().to_path_buf();
    debug!(filename, bytes = bytes.len(), "Spooled upload to {}", path.display());
    Ok(ResolvedInput::Spooled { path, _file: file })
}

/// Final path component, or `document.pdf` when there is none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string())
}
