//! Evaluation pipeline server.
//!
//! Polls the request queue, expands requests into jobs, submits them to
//! the compute backend, and scores completed jobs into the store. Runs
//! until killed; state is snapshotted so a restart resumes cleanly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dynaeval_backend::cloudwatch::CloudWatchMonitor;
use dynaeval_backend::queue::RequestSource;
use dynaeval_backend::request::parse_request;
use dynaeval_backend::sagemaker::SageMakerBackend;
use dynaeval_backend::sqs::SqsRequestSource;
use dynaeval_backend::store::FileStore;
use dynaeval_core::config::{load_dotenv, Config};
use dynaeval_core::entities::{DatasetRecord, ModelRecord, TaskRecord};
use dynaeval_core::repo::MemoryStore;
use dynaeval_datasets::task::{DatasetRegistry, TaskDataset};
use dynaeval_datasets::{HateSpeechDataset, MtDataset, NliDataset, QaDataset, SentimentDataset};
use dynaeval_pipeline::Requester;

#[derive(Parser, Debug)]
#[command(name = "eval-server", about = "Model evaluation pipeline server")]
struct Cli {
    /// Catalog file seeding the model/dataset/task repositories.
    #[arg(long, env = "EVAL_CATALOG")]
    catalog: PathBuf,

    /// Run a single pipeline iteration and exit.
    #[arg(long)]
    once: bool,
}

/// On-disk catalog: the records the repositories serve, plus which
/// scoring strategy each dataset uses.
#[derive(Debug, Deserialize)]
struct Catalog {
    tasks: Vec<TaskRecord>,
    models: Vec<ModelRecord>,
    datasets: Vec<CatalogDataset>,
}

#[derive(Debug, Deserialize)]
struct CatalogDataset {
    #[serde(flatten)]
    record: DatasetRecord,
    /// Scoring strategy: "nli", "qa", "sentiment", "hate-speech" or "mt".
    kind: String,
}

fn load_catalog(path: &PathBuf) -> Result<Catalog> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing catalog {}", path.display()))
}

fn build_registry(
    catalog: &Catalog,
    file_store: &Arc<FileStore>,
    base_uri: &str,
) -> Result<DatasetRegistry> {
    let mut registry = DatasetRegistry::new();
    for dataset in &catalog.datasets {
        let name = dataset.record.name.clone();
        let strategy: Arc<dyn TaskDataset> = match dataset.kind.as_str() {
            "nli" => Arc::new(NliDataset::new(name, file_store.clone(), base_uri)),
            "qa" => Arc::new(QaDataset::new(name, file_store.clone(), base_uri)),
            "sentiment" => Arc::new(SentimentDataset::new(name, file_store.clone(), base_uri)),
            "hate-speech" => Arc::new(HateSpeechDataset::new(name, file_store.clone(), base_uri)),
            "mt" => Arc::new(MtDataset::new(name, file_store.clone(), base_uri)),
            other => bail!("dataset {} has unknown kind {other:?}", dataset.record.name),
        };
        registry.register(strategy);
    }
    Ok(registry)
}

fn seed_store(catalog: Catalog) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for task in catalog.tasks {
        store.add_task(task);
    }
    for model in catalog.models {
        store.add_model(model);
    }
    for dataset in catalog.datasets {
        store.add_dataset(dataset.record);
    }
    Arc::new(store)
}

/// Pull inbound requests off the queue. Messages addressed to another
/// eval server go straight back; everything else is acked once decoded,
/// even when malformed, so a poison message cannot wedge the queue.
async fn drain_requests(
    source: &SqsRequestSource,
    server_id: &str,
    requester: &mut Requester,
) -> Result<()> {
    let messages = match source.poll(10).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "request queue poll failed");
            return Ok(());
        }
    };
    for message in messages {
        let request = match parse_request(&message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "dropping malformed request");
                if let Err(e) = source.ack(&message.receipt_handle).await {
                    warn!(error = %e, "ack failed");
                }
                continue;
            }
        };
        if request.eval_server_id != server_id {
            if let Err(e) = source.nack(&message.receipt_handle).await {
                warn!(error = %e, "nack failed");
            }
            continue;
        }
        if let Err(e) = source.ack(&message.receipt_handle).await {
            warn!(error = %e, "ack failed, request may be redelivered");
        }
        if request.reload_datasets {
            warn!("reload_datasets requested; the catalog loads at startup, restart to refresh");
        }
        match requester.request(&request).await {
            Ok(queued) => info!(message_id = %message.id, queued, "request accepted"),
            Err(e) => error!(message_id = %message.id, error = %e, "request expansion failed"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let catalog = load_catalog(&cli.catalog)?;
    info!(
        tasks = catalog.tasks.len(),
        models = catalog.models.len(),
        datasets = catalog.datasets.len(),
        "catalog loaded"
    );

    let (file_store, base_uri) = if config.aws.is_configured() {
        let bucket = config.aws.s3_bucket.as_deref().unwrap_or_default();
        let base_uri = match config.aws.s3_prefix.as_deref() {
            Some(prefix) => format!("s3://{bucket}/{prefix}"),
            None => format!("s3://{bucket}"),
        };
        (Arc::new(FileStore::s3(&config.aws)?), base_uri)
    } else {
        let base_uri = format!("file://{}", config.storage.data_dir.display());
        (
            Arc::new(FileStore::local(&config.storage.data_dir)?),
            base_uri,
        )
    };

    let registry = Arc::new(build_registry(&catalog, &file_store, &base_uri)?);
    let store = seed_store(catalog);

    let backend = Arc::new(SageMakerBackend::new(&config.aws));
    let monitor = Arc::new(CloudWatchMonitor::new(&config.aws));
    let source = match config.queue.queue_url {
        Some(_) => Some(SqsRequestSource::new(&config.aws, &config.queue)?),
        None => {
            warn!("no request queue configured, serving snapshot state only");
            None
        }
    };

    let mut requester = Requester::new(
        config.eval.clone(),
        backend,
        monitor,
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        registry,
    )?;

    info!(server_id = %config.eval.eval_server_id, "eval server started");

    let refresh_interval = Duration::from_secs(config.eval.full_refresh_interval_s);
    let poll_interval = Duration::from_secs(config.eval.poll_interval_s);
    // Force a full refresh on the first iteration to pick up snapshot jobs.
    let mut last_refresh: Option<Instant> = None;

    loop {
        if let Some(source) = source.as_ref() {
            if let Err(e) =
                drain_requests(source, &config.eval.eval_server_id, &mut requester).await
            {
                error!(error = %e, "request handling failed");
            }
        }

        requester.submit().await;

        let refresh_due = last_refresh.map_or(true, |at| at.elapsed() >= refresh_interval);
        if refresh_due {
            requester.update_status().await;
            last_refresh = Some(Instant::now());
        }

        requester.poll_outcomes().await;
        requester.compute_next().await;

        if cli.once {
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
