//! Password-protected archive wrapping for backup documents.
//!
//! The document travels as a gzip-compressed tar with a single entry,
//! sealed under the archive password. The archive password is independent
//! of the vault's own encryption secret — an exported archive can be
//! restored on any vault.

use std::io::Read;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use coffre_crypto_core::sealed;

use crate::error::VaultError;

/// Archive creation refuses passwords shorter than this.
pub const MIN_ARCHIVE_PASSWORD_LEN: usize = 4;

/// The single tar entry holding the backup document.
const BACKUP_ENTRY_NAME: &str = "coffre-backup.json";

/// Compress and seal a backup document.
///
/// # Errors
///
/// Returns [`VaultError::Export`] for a too-short password or any
/// compression/sealing failure.
pub fn wrap(document: &[u8], archive_password: &str) -> Result<Vec<u8>, VaultError> {
    if archive_password.chars().count() < MIN_ARCHIVE_PASSWORD_LEN {
        return Err(VaultError::Export(format!(
            "archive password must be at least {MIN_ARCHIVE_PASSWORD_LEN} characters"
        )));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(document.len() as u64);
    header.set_mode(0o600);
    header.set_cksum();
    tar.append_data(&mut header, BACKUP_ENTRY_NAME, document)?;

    let compressed = tar
        .into_inner()
        .map_err(|e| VaultError::Export(format!("failed to finish archive: {e}")))?
        .finish()
        .map_err(|e| VaultError::Export(format!("failed to finish compression: {e}")))?;

    sealed::seal(archive_password.as_bytes(), &compressed)
        .map_err(|e| VaultError::Export(format!("failed to seal archive: {e}")))
}

/// Unseal and decompress an archive, returning the backup document bytes.
///
/// # Errors
///
/// Returns [`VaultError::Import`] for a wrong password, corruption, or an
/// archive without a backup entry.
pub fn unwrap(blob: &[u8], archive_password: &str) -> Result<Vec<u8>, VaultError> {
    let compressed = sealed::open(archive_password.as_bytes(), blob)
        .map_err(|_| VaultError::Import("wrong archive password or corrupted archive".into()))?;

    let mut tar_bytes = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut tar_bytes)
        .map_err(|e| VaultError::Import(format!("failed to decompress archive: {e}")))?;

    let mut archive = tar::Archive::new(tar_bytes.as_slice());
    for entry in archive
        .entries()
        .map_err(|e| VaultError::Import(format!("failed to read archive entries: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| VaultError::Import(format!("failed to read archive entry: {e}")))?;
        let is_backup = entry
            .path()
            .ok()
            .is_some_and(|p| p.file_name().is_some_and(|n| n == BACKUP_ENTRY_NAME));
        if is_backup {
            let mut document = Vec::new();
            entry
                .read_to_end(&mut document)
                .map_err(|e| VaultError::Import(format!("failed to read backup entry: {e}")))?;
            return Ok(document);
        }
    }

    Err(VaultError::Import(
        "archive does not contain a backup document".into(),
    ))
}
