//! Data models for Google Drive and OAuth2 API payloads.

use serde::{Deserialize, Serialize};

/// Metadata for one item of a Shared Drive listing.
///
/// Optional fields stay `None` (or empty) when the API omits them; nothing
/// is filled in with a default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub shortcut_details: Option<ShortcutDetails>,
}

impl DriveItem {
    /// First parent, which is the only one shared-drive items ever have.
    pub fn parent_id(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

/// Target of a shortcut item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_mime_type: Option<String>,
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        Some(s) => s.parse::<u64>().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One page of the files.list API endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage {
    #[serde(default)]
    pub files: Vec<DriveItem>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Response body of a completed upload (`fields=id`).
#[derive(Debug, Deserialize)]
pub struct CreatedItem {
    pub id: String,
}

/// Google API error response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub code: u16,
    pub message: String,
}

/// OAuth client registration, as found under `installed` (or `web`) in the
/// client secrets file downloaded from the Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

pub(crate) fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Top level of the client secrets file.
#[derive(Debug, Deserialize)]
pub struct ClientSecretsFile {
    pub installed: Option<ClientSecrets>,
    pub web: Option<ClientSecrets>,
}

/// OAuth2 token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth2 token endpoint error body.
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
