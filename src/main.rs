//! drive_batch CLI - list, download, export and upload Google Drive files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drive_batch::auth::DRIVE_SCOPE;
use drive_batch::client::{DEFAULT_CHUNK_SIZE, MAX_PAGE_SIZE};
use drive_batch::transfer::{self, export_mime_type, TransferOutcome};
use drive_batch::{extract_id, sink, CredentialManager, DriveClient, FileTokenStore};

/// Batch jobs against Google Drive.
#[derive(Parser)]
#[command(name = "drive_batch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Credential cache, rewritten after every authorization or refresh.
    #[arg(long, env = "DRIVE_TOKEN_CACHE", default_value = "token.json")]
    token_cache: PathBuf,

    /// OAuth client secrets, only read when the user has to authorize.
    #[arg(long, env = "DRIVE_CLIENT_SECRETS", default_value = "credentials.json")]
    client_secrets: PathBuf,

    /// Seconds to wait for the browser consent to complete.
    #[arg(long, env = "DRIVE_CONSENT_TIMEOUT", default_value_t = 300)]
    consent_timeout: u64,

    /// Bytes per download/upload request.
    #[arg(long, env = "DRIVE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Log debug details to stderr (RUST_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write every item of a Shared Drive to a CSV file.
    List {
        /// Shared Drive URL or ID.
        drive: String,

        /// CSV file to create (overwritten if present).
        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Items per list request (1-1000).
        #[arg(long, default_value_t = MAX_PAGE_SIZE)]
        page_size: u32,
    },

    /// Download binary files, each saved under its ID.
    Download {
        /// File URLs or IDs.
        #[arg(required = true)]
        files: Vec<String>,

        /// Destination directory.
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,
    },

    /// Export Google Docs, Sheets or Slides in another format.
    Export {
        /// Document URLs or IDs.
        #[arg(required = true)]
        files: Vec<String>,

        /// docx, xlsx, pptx, pdf, or any MIME type the document supports.
        #[arg(long, short = 'f')]
        format: String,

        /// Destination directory.
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,
    },

    /// Upload a local file into a folder.
    Upload {
        /// Local file to upload.
        file: PathBuf,

        /// Destination folder URL or ID.
        #[arg(long, short = 't')]
        to: String,

        /// Name of the new item (defaults to the local file name).
        #[arg(long)]
        name: Option<String>,

        /// Content type (guessed from the extension when omitted).
        #[arg(long)]
        mime_type: Option<String>,
    },
}

/// A command with every URL resolved to an ID, ready to run.
#[derive(Debug, PartialEq)]
enum Job {
    List {
        drive_id: String,
        output: PathBuf,
        page_size: u32,
    },
    Download {
        file_ids: Vec<String>,
        to: PathBuf,
    },
    Export {
        file_ids: Vec<String>,
        mime_type: String,
        to: PathBuf,
    },
    Upload {
        file: PathBuf,
        folder_id: String,
        name: String,
        mime_type: String,
    },
}

/// Resolve links and defaults. Runs before authorization, so a typo never
/// costs a consent round trip.
fn plan(command: Commands) -> Result<Job> {
    let job = match command {
        Commands::List {
            drive,
            output,
            page_size,
        } => Job::List {
            drive_id: extract_id(&drive)
                .with_context(|| format!("Invalid drive URL or ID: {}", drive))?,
            output,
            page_size,
        },

        Commands::Download { files, to } => Job::Download {
            file_ids: file_ids(&files)?,
            to,
        },

        Commands::Export { files, format, to } => Job::Export {
            file_ids: file_ids(&files)?,
            mime_type: export_mime_type(&format).to_string(),
            to,
        },

        Commands::Upload {
            file,
            to,
            name,
            mime_type,
        } => {
            let folder_id =
                extract_id(&to).with_context(|| format!("Invalid folder URL or ID: {}", to))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("Cannot derive a name from {:?}", file))?,
            };
            let mime_type = mime_type.unwrap_or_else(|| {
                mime_guess::from_path(&file)
                    .first_or_octet_stream()
                    .to_string()
            });

            Job::Upload {
                file,
                folder_id,
                name,
                mime_type,
            }
        }
    };

    Ok(job)
}

fn file_ids(inputs: &[String]) -> Result<Vec<String>> {
    inputs
        .iter()
        .map(|input| {
            extract_id(input).with_context(|| format!("Invalid file URL or ID: {}", input))
        })
        .collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let job = plan(cli.command)?;

    let manager = CredentialManager::new(
        FileTokenStore::new(&cli.token_cache),
        &cli.client_secrets,
        vec![DRIVE_SCOPE.to_string()],
    )
    .with_consent_timeout(Duration::from_secs(cli.consent_timeout));

    let credential = manager
        .authorize()
        .await
        .context("Failed to obtain Google Drive credentials")?;

    let client = DriveClient::new(&credential).with_chunk_size(cli.chunk_size);

    match job {
        Job::List {
            drive_id,
            output,
            page_size,
        } => {
            info!("Listing drive {} into {:?}", drive_id, output);
            let mut pager = client.list_items(&drive_id, page_size);
            let rows = sink::write_csv(&mut pager, &output).await.with_context(|| {
                format!(
                    "Listing of drive {} failed after {} item(s); partial output kept in {:?}",
                    drive_id,
                    pager.items_yielded(),
                    output
                )
            })?;

            println!("Wrote {} item(s) to {}", rows, output.display());
        }

        Job::Download { file_ids, to } => {
            ensure_dir(&to)?;
            let mut outcomes = Vec::new();
            for file_id in &file_ids {
                let outcome = transfer::download(&client, file_id, &to).await;
                println!("{}", outcome);
                outcomes.push(outcome);
            }
            summarize(&outcomes)?;
        }

        Job::Export {
            file_ids,
            mime_type,
            to,
        } => {
            ensure_dir(&to)?;
            let mut outcomes = Vec::new();
            for file_id in &file_ids {
                let outcome = transfer::export(&client, file_id, &mime_type, &to).await;
                println!("{}", outcome);
                outcomes.push(outcome);
            }
            summarize(&outcomes)?;
        }

        Job::Upload {
            file,
            folder_id,
            name,
            mime_type,
        } => {
            let outcome = transfer::upload(&client, &file, &name, &mime_type, &folder_id).await;
            println!("{}", outcome);
            summarize(std::slice::from_ref(&outcome))?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "drive_batch=debug"
    } else {
        "drive_batch=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))
}

/// Fail the process once every transfer has been attempted if any failed.
fn summarize(outcomes: &[TransferOutcome]) -> Result<()> {
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} transfer(s) failed", failed, outcomes.len());
    }
    Ok(())
}
