use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use url::Url;

use ferry::{Config, HttpSource, Transfer, TransferEvent, TransferRequest};

/// Stream a remote HTTP resource into an object storage bucket.
#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// URL of the resource to copy.
    #[arg(long, required_unless_present = "event")]
    url: Option<Url>,

    /// Read the invocation event (JSON with `url` and optionally `chunk_size` in MiB, `bucket`,
    /// `key`) from this file, or from stdin when given `-`.
    #[arg(long, conflicts_with = "url")]
    event: Option<PathBuf>,

    #[arg(long, env = "BUCKET_NAME")]
    bucket: Option<String>,

    /// Destination key; defaults to the last path segment of the URL.
    #[arg(long)]
    key: Option<String>,

    /// Part size in bytes.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of parts uploaded at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Abort the transfer if it has not finished after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn read_event(path: &PathBuf) -> Result<TransferEvent> {
    let mut s = String::new();
    if path.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut s)?;
    } else {
        File::open(path)
            .with_context(|| format!("opening event file {}", path.display()))?
            .read_to_string(&mut s)?;
    }
    Ok(serde_json::from_str(&s)?)
}

fn build_request(cli: Cli, config: &Config) -> Result<TransferRequest> {
    let event = cli.event.as_ref().map(read_event).transpose()?;

    let (event_chunk_size, url, event_bucket, event_key) = match event {
        Some(event) => (
            event.chunk_size_bytes()?,
            event.url,
            event.bucket,
            event.key,
        ),
        None => (
            None,
            cli.url.context("a source url is required")?,
            None,
            None,
        ),
    };

    let bucket = event_bucket
        .or(cli.bucket)
        .or_else(|| config.transfer.bucket.clone())
        .context("no destination bucket: pass --bucket or set BUCKET_NAME")?;

    let mut request = TransferRequest::new(url, bucket);
    request.key = event_key.or(cli.key);
    request.chunk_size = event_chunk_size
        .or(cli.chunk_size)
        .unwrap_or(config.transfer.chunk_size);
    request.concurrency = cli.concurrency.unwrap_or(config.transfer.concurrency);
    request.timeout_secs = cli.timeout_secs.or(config.transfer.timeout_secs);
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // load configuration
    let config = match &cli.config_file {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let request = build_request(cli, &config)?;
    tracing::info!(url = %request.source, bucket = %request.bucket, chunk_size = request.chunk_size, "transfer requested");

    // initialize collaborators
    let objects = config.objects.new_objects().await?;
    let source = Arc::new(HttpSource::new(&config.source)?);
    let transfer = Transfer::new(source, objects);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling transfer");
            on_signal.cancel();
        }
    });

    let result = transfer.execute(&request, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
