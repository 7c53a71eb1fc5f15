use std::path::{Component, Path};

use crate::TransferError;

/// Longest file name accepted for an upload session.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Validates a client-supplied file name.
///
/// The name is only ever used as a label and as the suffix of the object
/// handed to remote storage, so it must be a single plain path component.
/// Rejects:
/// - Empty or whitespace-only names
/// - Names longer than [`MAX_FILE_NAME_LEN`] bytes
/// - Path separators, absolute paths and `..` / `.`
/// - Control characters
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.trim().is_empty() {
        return Err(TransferError::InvalidFileName("empty file name".into()));
    }

    if file_name.len() > MAX_FILE_NAME_LEN {
        return Err(TransferError::InvalidFileName(format!(
            "file name longer than {MAX_FILE_NAME_LEN} bytes"
        )));
    }

    if file_name.chars().any(|c| c.is_control()) {
        return Err(TransferError::InvalidFileName(
            "control characters not allowed".into(),
        ));
    }

    if file_name.contains('/') || file_name.contains('\\') {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {file_name}"
        )));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
