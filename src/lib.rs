//! drive_batch - batch jobs against Google Drive for an authorized user.
//!
//! This library provides functionality to:
//! - Authorize with an installed-app OAuth flow and cache the credential
//! - List every item of a Shared Drive into a CSV file, page by page
//! - Download, export and upload single files with progress reporting
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use drive_batch::auth::DRIVE_SCOPE;
//! use drive_batch::{sink, CredentialManager, DriveClient, FileTokenStore};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = CredentialManager::new(
//!         FileTokenStore::new("token.json"),
//!         "credentials.json",
//!         vec![DRIVE_SCOPE.to_string()],
//!     );
//!     let credential = manager.authorize().await?;
//!     let client = DriveClient::new(&credential);
//!
//!     let mut pager = client.list_items("drive-id", 1000);
//!     let rows = sink::write_csv(&mut pager, Path::new("drive.csv")).await?;
//!     println!("{} items", rows);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod consent;
pub mod error;
pub mod models;
pub mod pager;
pub mod sink;
pub mod transfer;
pub mod url_parser;

// Re-exports for convenience
pub use auth::{Credential, CredentialManager, FileTokenStore, TokenStore};
pub use client::{DriveClient, DriveEndpoints};
pub use error::{DriveError, Result};
pub use models::DriveItem;
pub use pager::ItemPager;
pub use transfer::TransferOutcome;
pub use url_parser::extract_id;
