//! Command-line client for a running Clarity server.
//!
//!   clarity-cli transform "The mitochondria is the powerhouse of the cell." --type simplify --level 3
//!   clarity-cli upload lecture.pptx --wait
//!   clarity-cli status <document-id>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clarity::{
    api::models::transform::TransformRequest,
    client::{ClarityClient, DocumentOutcome, PollPolicy},
};
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

/// CLI client for the Clarity API
#[derive(Parser)]
#[command(name = "clarity-cli", version)]
#[command(about = "Command-line client for the Clarity API", long_about = None)]
struct Cli {
    /// API server base URL
    #[arg(short, long, env = "CLARITY_URL", default_value = "http://localhost:8000")]
    server: Url,

    /// Access token sent as a bearer credential
    #[arg(short, long, env = "CLARITY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a passage of text
    Transform {
        /// Text to rewrite (at most 250 characters)
        text: String,

        /// Direction of the rewrite
        #[arg(long = "type", value_parser = ["simplify", "sophisticate", "casualise", "formalise"])]
        transformation_type: String,

        /// Intensity from 1 to 5
        #[arg(short, long)]
        level: Option<i64>,

        /// Keep lecture terminology and structure
        #[arg(long)]
        lecture: bool,
    },

    /// Upload a lecture document for conversion
    Upload {
        /// PowerPoint, Word or PDF file
        path: PathBuf,

        /// Poll until the conversion finishes
        #[arg(short, long)]
        wait: bool,

        /// Time between status checks
        #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
        poll_interval: Duration,

        /// Status checks before falling back to the PDF location
        #[arg(long, default_value = "10")]
        max_polls: u32,

        /// Save the converted PDF here once ready
        #[arg(short, long, requires = "wait")]
        output: Option<PathBuf>,
    },

    /// Show the conversion status of an upload
    Status {
        /// Document ID returned by the upload
        id: Uuid,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    clarity::install_crypto_provider();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut client = ClarityClient::new(cli.server).context("Failed to build HTTP client")?;
    if let Some(token) = cli.token {
        client = client.with_token(token);
    }

    match cli.command {
        Commands::Transform {
            text,
            transformation_type,
            level,
            lecture,
        } => {
            let request = TransformRequest {
                text,
                transformation_type,
                level,
                is_lecture: lecture.then_some(true),
            };
            let response = client.transform(&request).await.context("Transformation failed")?;

            println!("{}", response.transformed_text);
            eprintln!("  model: {}, level: {}", response.model, response.level);
            if let Some(quota) = response.rate_limit {
                eprintln!(
                    "  {} transformations left, resets in {}s",
                    quota.requests_remaining, quota.time_until_reset
                );
            }
        }

        Commands::Upload {
            path,
            wait,
            poll_interval,
            max_polls,
            output,
        } => {
            let upload = client
                .upload(&path)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            println!("✓ Uploaded {}", path.display());
            println!("  ID: {}", upload.document_id);
            println!("  Status: {:?}", upload.status);

            if let Some(files) = &upload.files {
                println!("  PDF: {}", client.url(&files.pdf)?);
            }
            if !wait || upload.files.is_some() {
                return Ok(());
            }

            client = client.with_polling(PollPolicy {
                interval: poll_interval,
                max_attempts: max_polls,
                ..PollPolicy::default()
            });
            let pdf_path = match client.wait_for_document(upload.document_id).await? {
                DocumentOutcome::Completed(status) => {
                    println!("✓ Conversion complete");
                    let files = status.files.context("Completed status has no files")?;
                    println!("  PDF: {}", client.url(&files.pdf)?);
                    if let Some(html) = &files.html {
                        println!("  HTML: {}", client.url(html)?);
                    }
                    files.pdf
                }
                DocumentOutcome::Failed(status) => {
                    eprintln!("✗ Conversion failed: {}", status.error.unwrap_or_default());
                    std::process::exit(1);
                }
                DocumentOutcome::Fallback { pdf_url } => {
                    println!("… Conversion still running, the PDF should appear at {pdf_url}");
                    pdf_url.to_string()
                }
            };

            if let Some(output) = output {
                let bytes = client.download(&pdf_path).await.context("Failed to download PDF")?;
                tokio::fs::write(&output, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!("  Saved to {}", output.display());
            }
        }

        Commands::Status { id } => {
            let status = client.status(id).await.context("Failed to get document status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        Commands::Health => {
            let health = client.health().await.context("Health check failed")?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
