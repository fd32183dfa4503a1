mod config;
mod render;
mod upload;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{medical_records, GatewayError, HttpGateway, UploadState};
use shared::domain::DocumentKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, DEFAULT_SETTINGS_FILE};

#[derive(Parser, Debug)]
#[command(about = "Upload documents to the OCR gateway and browse the results")]
struct Cli {
    /// Overrides the gateway base URL from config and environment.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and follow it until processing settles.
    Upload {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = KindArg::Receipt)]
        kind: KindArg,
        /// Print the final snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Receipt OCR requests.
    Requests,
    Transactions,
    /// Medical records extracted from standard documents.
    Records,
    Record {
        id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Receipt,
    Document,
}

impl From<KindArg> for DocumentKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Receipt => DocumentKind::Receipt,
            KindArg::Document => DocumentKind::StandardDocument,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }

    let gateway = HttpGateway::with_timeout(&settings.api_base_url, settings.request_timeout())
        .with_context(|| format!("invalid gateway base url '{}'", settings.api_base_url))?;
    info!(base_url = %gateway.base_url(), "dashboard: using gateway");

    match cli.command {
        Command::Upload { path, kind, json } => {
            let file = upload::read_upload_file(&path).await?;
            let snapshot =
                upload::run_upload(Arc::new(gateway), &settings, kind.into(), file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            if let Some(message) = snapshot.error_message() {
                bail!("{message}");
            }
            if snapshot.state != UploadState::Completed {
                bail!("upload ended in state '{}'", snapshot.state.as_str());
            }
        }
        Command::Requests => {
            let requests = gateway.list_requests().await?;
            print!("{}", render::render_requests(&requests));
        }
        Command::Transactions => {
            let transactions = gateway.list_transactions().await?;
            print!("{}", render::render_transactions(&transactions));
        }
        Command::Records => {
            let records = medical_records(gateway.list_ocr_results().await?);
            print!("{}", render::render_medical_records(&records));
        }
        Command::Record { id } => match gateway.medical_record(&id).await {
            Ok(record) => print!("{}", render::render_medical_record(&record)),
            Err(GatewayError::NotFound(message)) => bail!("{message}"),
            Err(err) => return Err(err.into()),
        },
    }

    Ok(())
}
