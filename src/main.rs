use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use upload_queue::{
    HttpUploadEndpoint, ItemStatus, Payload, QueueConfig, QueueManager, UploadController,
};

/// Upload local files as one batch
#[derive(Debug, Parser)]
#[command(name = "upload-queue", version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entity the files belong to
    #[arg(long)]
    entity_id: String,

    /// Display name of the entity
    #[arg(long)]
    entity_name: Option<String>,

    /// Override the configured concurrency
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Send files without compressing them
    #[arg(long)]
    no_compression: bool,

    /// Extra metadata as key=value
    #[arg(short, long = "meta", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s}"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => QueueConfig::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config = config.with_max_concurrency(concurrency);
    }
    if cli.no_compression {
        config = config.with_compression(false);
    }

    let endpoint = HttpUploadEndpoint::new(&config.endpoint)?;
    let (queue, worker) = QueueManager::builder(Arc::new(endpoint))
        .config(config)
        .build()?;
    let controller = UploadController::new(queue.clone());

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let payload = Payload::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(payload);
    }

    let entity_name = cli.entity_name.unwrap_or_else(|| cli.entity_id.clone());
    let metadata: HashMap<String, String> = cli.metadata.into_iter().collect();

    let Some(batch) = controller.upload(cli.entity_id, entity_name, files, metadata).await else {
        bail!("upload queue stopped before the batch finished");
    };

    for item in &batch.items {
        match (&item.status, &item.result, &item.error) {
            (ItemStatus::Completed, Some(reference), _) => println!("ok      {}  {}", item.file.name, reference.url),
            (ItemStatus::Failed, _, Some(error)) => println!("failed  {}  {}", item.file.name, error),
            (status, _, _) => println!("{:<7} {}", format!("{status:?}").to_lowercase(), item.file.name),
        }
    }

    queue.shutdown().await?;
    worker.await?;

    if batch.count(ItemStatus::Completed) == 0 && !batch.items.is_empty() {
        bail!("no file was uploaded");
    }
    Ok(())
}
