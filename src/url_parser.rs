//! Accept either a raw Drive ID or a link copied from the browser.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{DriveError, Result};

/// Link shapes that carry an ID, tried in order. Group 1 is the ID.
static LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Folders and shared drive roots
        r"^https?://drive\.google\.com/drive/(?:u/\d+/)?folders/([a-zA-Z0-9_-]+)",
        // Binary files
        r"^https?://drive\.google\.com/file/(?:u/\d+/)?d/([a-zA-Z0-9_-]+)",
        // Legacy open links
        r"^https?://drive\.google\.com/open\?(?:.*&)?id=([a-zA-Z0-9_-]+)",
        // Docs editors, the usual export sources
        r"^https?://docs\.google\.com/(?:document|spreadsheets|presentation|drawings)/(?:u/\d+/)?d/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid Drive link regex"))
    .collect()
});

/// Valid Google Drive ID pattern (alphanumeric, underscore, hyphen).
static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid ID regex"));

/// Extract a Google Drive ID from a link or validate a raw ID.
///
/// Recognized links:
/// - `https://drive.google.com/drive/[u/N/]folders/<ID>`
/// - `https://drive.google.com/file/d/<ID>/view`
/// - `https://drive.google.com/open?id=<ID>`
/// - `https://docs.google.com/{document,spreadsheets,presentation}/d/<ID>/edit`
///
/// # Examples
///
/// ```
/// use drive_batch::url_parser::extract_id;
///
/// let id = extract_id("https://docs.google.com/document/d/1abc123/edit").unwrap();
/// assert_eq!(id, "1abc123");
///
/// let id = extract_id("0AFolderRoot").unwrap();
/// assert_eq!(id, "0AFolderRoot");
/// ```
pub fn extract_id(url_or_id: &str) -> Result<String> {
    let trimmed = url_or_id.trim();

    let from_link = LINK_PATTERNS
        .iter()
        .find_map(|re| re.captures(trimmed)?.get(1))
        .map(|m| m.as_str().to_string());
    if let Some(id) = from_link {
        return Ok(id);
    }

    if ID_REGEX.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(DriveError::InvalidUrlOrId(url_or_id.to_string()))
}
