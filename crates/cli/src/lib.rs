use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folio_core::{
    BatchReport, BatchRequest, PageImageService, PipelineConfig, Priority, QualityMode,
};
use folio_render::{SyntheticDocument, SyntheticRenderer};
use futures::StreamExt;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DOCUMENT_ID: &str = "synthetic";

#[derive(Debug, Parser)]
#[command(name = "folio-cli")]
#[command(about = "Folio page image pipeline CLI")]
pub struct Cli {
    /// JSON configuration file. Environment variables override its values.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one page of a synthetic document to a PNG.
    Render {
        /// Number of pages in the synthetic document.
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Page index to render (0-based).
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = QualityMode::Preview)]
        mode: QualityMode,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Render every page of a synthetic document as a batch.
    Batch {
        #[arg(long)]
        pages: usize,
        /// Pages per chunk; one progress line is printed per chunk.
        #[arg(long)]
        chunk: Option<usize>,
        /// Maximum renders executing at once.
        #[arg(long)]
        concurrency: Option<usize>,
        /// Cancel the batch after this many progress events.
        #[arg(long, value_name = "EVENTS")]
        cancel_after: Option<usize>,
        #[arg(long, default_value_t = QualityMode::Preview)]
        mode: QualityMode,
        /// Simulated render time per page in milliseconds.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Page index whose render fails (repeatable).
        #[arg(long = "fail-page", value_name = "PAGE")]
        fail_pages: Vec<usize>,
    },
    /// Print the effective configuration as JSON.
    Config,
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BatchLine {
    Progress { batch: u64, completed: f64 },
    Summary(BatchSummary),
}

#[derive(Debug, Serialize)]
struct BatchSummary {
    batch: u64,
    total: usize,
    succeeded: usize,
    failed: usize,
    cancelled: bool,
    renders: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Render { pages, page, mode, output } => {
            let config = load_config(cli.config.as_deref())?;
            block_on(run_render(config, pages, page, mode, output))
        }
        Commands::Batch { pages, chunk, concurrency, cancel_after, mode, delay_ms, fail_pages } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(chunk) = chunk {
                config = config.with_batch_chunk_size(chunk);
            }
            if let Some(concurrency) = concurrency {
                config = config.with_max_concurrent_renders(concurrency);
            }
            let mut renderer = SyntheticRenderer::new().with_delay(Duration::from_millis(delay_ms));
            for page in fail_pages {
                renderer = renderer.with_failing_page(page);
            }
            block_on(run_batch(config, pages, mode, cancel_after, Arc::new(renderer)))
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::from_env().context("failed to load configuration from environment")?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(future)
}

async fn run_render(
    config: PipelineConfig,
    pages: usize,
    page: usize,
    mode: QualityMode,
    output: Option<PathBuf>,
) -> Result<()> {
    if page >= pages {
        anyhow::bail!("--page {page} is out of range for a {pages}-page document");
    }

    let service = PageImageService::new(config, Arc::new(SyntheticRenderer::new()))?;
    service.open_document(DOCUMENT_ID, Arc::new(SyntheticDocument::letter(pages)));

    let entry = service
        .request_image(DOCUMENT_ID, page, mode, Priority::Interactive)
        .await
        .with_context(|| format!("failed to render page {page}"))?;

    let output = output.unwrap_or_else(|| default_output(page, mode));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    entry
        .image()
        .as_rgba()
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());

    Ok(())
}

async fn run_batch(
    config: PipelineConfig,
    pages: usize,
    mode: QualityMode,
    cancel_after: Option<usize>,
    renderer: Arc<SyntheticRenderer>,
) -> Result<()> {
    let service = PageImageService::new(config, renderer.clone())?;
    service.open_document(DOCUMENT_ID, Arc::new(SyntheticDocument::letter(pages)));

    let mut handle = service.start_batch(BatchRequest::new(DOCUMENT_ID, 0..pages, mode));
    let batch = handle.id().as_u64();
    let mut events = 0;

    while let Some(completed) = handle.progress.next().await {
        events += 1;
        print_line(&BatchLine::Progress { batch, completed })?;
        if cancel_after == Some(events) {
            handle.cancel();
        }
    }

    let report = handle.completion.await;
    print_line(&BatchLine::Summary(summary(&report, renderer.render_count())))?;

    Ok(())
}

fn summary(report: &BatchReport, renders: usize) -> BatchSummary {
    BatchSummary {
        batch: report.id.as_u64(),
        total: report.total,
        succeeded: report.succeeded(),
        failed: report.failed(),
        cancelled: report.cancelled,
        renders,
    }
}

fn print_line(line: &BatchLine) -> Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

fn default_output(page: usize, mode: QualityMode) -> PathBuf {
    PathBuf::from(format!("page-{page}-{mode}.png"))
}
