///
/// This module implements the CLI for mendeley-uploader: command parsing, argument
/// validation and the async entrypoint shared by `main` and the integration tests.
///
/// The upload pipeline itself (scanning, retries, ledger, run state) lives in
/// [`mendeley-uploader-core`]. This module only wires configuration, HTTP clients and
/// the dashboard together.
///
/// ## Commands
/// - `serve`: run the local dashboard until Ctrl-C.
/// - `upload`: run one batch in the foreground and report the result.
/// - `authorize`: walk through the OAuth consent flow to obtain a refresh token.
///
/// [`mendeley-uploader-core`]: ../../mendeley_uploader_core/
use crate::dashboard::{self, Dashboard};
use crate::load_config::AppConfig;
use crate::mendeley::MendeleyClient;
use crate::oauth::OAuthClient;
use crate::telemetry::LogBuffer;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mendeley_uploader_core::batch::upload_batch;
use mendeley_uploader_core::ledger::{Ledger, Outcome};
use mendeley_uploader_core::monitor::RunMonitor;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI for mendeley-uploader: push local PDFs into a Mendeley library.
#[derive(Parser)]
#[clap(
    name = "mendeley-uploader",
    version,
    about = "Upload local PDFs to a Mendeley library, from the command line or a local dashboard"
)]
pub struct Cli {
    /// Path to an optional YAML config file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the dashboard on the configured address
    Serve {
        /// Override the bind address, e.g. 127.0.0.1:8000
        #[clap(long)]
        bind: Option<SocketAddr>,
    },
    /// Upload a folder (or a single PDF) and exit
    Upload {
        /// Folder or PDF to upload; defaults to the configured upload directory
        path: Option<PathBuf>,
    },
    /// Obtain a new refresh token through the OAuth consent page
    Authorize {
        /// Authorization code from the redirect; prompted for when omitted
        #[clap(long)]
        code: Option<String>,
    },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli, config: AppConfig, logs: LogBuffer) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { bind } => {
            let addr = bind.unwrap_or(config.bind);
            tracing::info!(command = "serve", %addr, "Starting dashboard");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind dashboard to {addr}"))?;
            let app = Dashboard::new(config, logs);
            dashboard::serve(app, listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await
        }
        Commands::Upload { path } => upload(config, path).await,
        Commands::Authorize { code } => authorize(&config, code).await,
    }
}

async fn upload(config: AppConfig, path: Option<PathBuf>) -> Result<()> {
    let target = path
        .or_else(|| config.upload_dir.clone())
        .ok_or_else(|| anyhow!("No path given and no upload directory configured"))?;
    if !target.exists() {
        tracing::error!(command = "upload", target = %target.display(), "Path not found");
        bail!("Path not found: {}", target.display());
    }

    tracing::info!(command = "upload", target = %target.display(), "Starting upload");
    let monitor = RunMonitor::new();
    let run = monitor
        .try_start()
        .ok_or_else(|| anyhow!("Another batch is already running"))?;
    let tokens = OAuthClient::from_config(&config);
    let library = MendeleyClient::from_config(&config);
    let ledger = Ledger::new(config.ledger_path.clone());

    let report = upload_batch(run, &config.batch, &tokens, &library, &ledger, &target)
        .await
        .map_err(|e| {
            tracing::error!(command = "upload", error = %e, "Upload failed");
            anyhow::Error::new(e)
        })?;

    for file in &report.files {
        match (&file.outcome, &file.error) {
            (Outcome::Success, _) => println!(
                "ok      {} ({})",
                file.file.display(),
                file.document_id.as_deref().unwrap_or("-")
            ),
            (_, error) => println!(
                "failed  {}: {}",
                file.file.display(),
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!(
        "{} uploaded, {} failed, {} skipped{}",
        report.succeeded(),
        report.failed(),
        report.skipped,
        if report.stopped { " (stopped)" } else { "" }
    );
    tracing::info!(command = "upload", ?report, "Upload complete");

    if report.failed() > 0 {
        bail!("{} of {} files failed to upload", report.failed(), report.files.len());
    }
    Ok(())
}

async fn authorize(config: &AppConfig, code: Option<String>) -> Result<()> {
    let oauth = OAuthClient::from_config(config);
    let url = oauth
        .authorization_url()
        .context("Failed to build authorization URL")?;
    println!("Open this URL in your browser and approve access:\n\n  {url}\n");
    println!(
        "After approving you are redirected to {}?code=...; copy the code value.",
        config.credentials.redirect_uri
    );

    let code = match code {
        Some(code) => code,
        None => tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt("Paste the code here")
                .interact_text()
        })
        .await
        .context("Prompt task panicked")?
        .context("Failed to read authorization code")?,
    };

    let tokens = oauth.exchange_code(&code).await.map_err(|e| {
        tracing::error!(command = "authorize", error = %e, "Code exchange failed");
        anyhow::Error::new(e)
    })?;
    match tokens.refresh_token {
        Some(refresh_token) => {
            println!("\nSUCCESS! Add this line to your .env file:\n");
            println!("MENDELEY_REFRESH_TOKEN={refresh_token}");
            Ok(())
        }
        None => bail!("The token response did not contain a refresh token"),
    }
}
