//! Single-file download, export and upload with console progress.
//!
//! Each call stands alone: failures are reported and returned as a
//! [`TransferOutcome`], never propagated, so a batch of transfers carries on
//! past a bad file.

use std::fmt;
use std::path::Path;

use tracing::{error, info};

use crate::client::DriveClient;
use crate::models::format_size;

/// Word document export format.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
/// PowerPoint export format.
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
/// Excel export format.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
/// PDF export format.
pub const PDF_MIME: &str = "application/pdf";

/// Map a short format name to its MIME type; anything else is taken as a
/// MIME type already.
pub fn export_mime_type(format: &str) -> &str {
    match format.to_ascii_lowercase().as_str() {
        "docx" => DOCX_MIME,
        "pptx" => PPTX_MIME,
        "xlsx" => XLSX_MIME,
        "pdf" => PDF_MIME,
        _ => format,
    }
}

/// Result of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// `remote_id` is set for uploads.
    Succeeded {
        file_id: String,
        remote_id: Option<String>,
    },
    Failed {
        file_id: String,
        error: String,
    },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded { .. })
    }

    /// The file the transfer was about: remote ID, or local path for uploads.
    pub fn file_id(&self) -> &str {
        match self {
            TransferOutcome::Succeeded { file_id, .. }
            | TransferOutcome::Failed { file_id, .. } => file_id,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            TransferOutcome::Succeeded { remote_id, .. } => remote_id.as_deref(),
            TransferOutcome::Failed { .. } => None,
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Succeeded {
                file_id,
                remote_id: Some(remote_id),
            } => write!(f, "Upload File ID: \"{}\" ----> \"{}\".", remote_id, file_id),
            TransferOutcome::Succeeded { file_id, .. } => write!(f, "{} - Done.", file_id),
            TransferOutcome::Failed { file_id, error } => {
                write!(f, "{} - An error occurred: {}", file_id, error)
            }
        }
    }
}

/// Percent line printed after each chunk.
pub fn progress_line(file_id: &str, received: u64, total: Option<u64>) -> String {
    match total {
        Some(0) => format!("{} - Download 100.", file_id),
        Some(total) => format!("{} - Download {}.", file_id, received.min(total) * 100 / total),
        None => format!("{} - Downloaded {}.", file_id, format_size(received)),
    }
}

/// Download a binary file into `dest_dir`, named after its ID.
pub async fn download(client: &DriveClient, file_id: &str, dest_dir: &Path) -> TransferOutcome {
    let destination = dest_dir.join(file_id);
    let result = client
        .download_media(file_id, &destination, |received, total| {
            println!("{}", progress_line(file_id, received, total));
        })
        .await;

    finish(file_id, result.map(|bytes| {
        info!("Downloaded {} ({}) to {:?}", file_id, format_size(bytes), destination);
        None
    }))
}

/// Export a Workspace document as `mime_type` into `dest_dir`, named after
/// its ID.
pub async fn export(
    client: &DriveClient,
    file_id: &str,
    mime_type: &str,
    dest_dir: &Path,
) -> TransferOutcome {
    let destination = dest_dir.join(file_id);
    let result = client
        .export_media(file_id, mime_type, &destination, |received, total| {
            println!("{}", progress_line(file_id, received, total));
        })
        .await;

    finish(file_id, result.map(|bytes| {
        info!(
            "Exported {} as {} ({}) to {:?}",
            file_id,
            mime_type,
            format_size(bytes),
            destination
        );
        None
    }))
}

/// Upload `local_path` as `name` into folder `parent_id`.
pub async fn upload(
    client: &DriveClient,
    local_path: &Path,
    name: &str,
    mime_type: &str,
    parent_id: &str,
) -> TransferOutcome {
    let label = local_path.display().to_string();
    let result = client
        .upload_resumable(local_path, name, mime_type, parent_id)
        .await;

    finish(&label, result.map(Some))
}

fn finish(file_id: &str, result: crate::error::Result<Option<String>>) -> TransferOutcome {
    match result {
        Ok(remote_id) => TransferOutcome::Succeeded {
            file_id: file_id.to_string(),
            remote_id,
        },
        Err(e) => {
            error!("Transfer of {} failed: {}", file_id, e);
            TransferOutcome::Failed {
                file_id: file_id.to_string(),
                error: e.to_string(),
            }
        }
    }
}
