mod backend;
mod cache;
mod cli;
mod config;
mod domain;
mod error;
mod logging;
mod pipeline;
mod reindex;
mod server;
mod upstream;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use backend::fs::FsBackend;
use backend::s3::S3Backend;
use backend::Backend;
use cache::Cache;
use cli::{Cli, Command};
use config::{BackendKind, Config, UPSTREAM_GALLERY_HOST, UPSTREAM_QUERY_URL};
use domain::UniqueId;
use error::Result;
use pipeline::{AcquireRequest, Pipeline};
use upstream::{HttpUpstreamClient, UpstreamClient};

/// Exit code for a command whose batch completed with some failures, not
/// none and not all — per the CLI surface in the core's external-interfaces
/// section.
const EXIT_PARTIAL_FAILURE: u8 = 78;

async fn build_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    match config.backend_kind {
        BackendKind::Fs => Ok(Arc::new(FsBackend::new(config.fs_root.clone()))),
        BackendKind::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| error::MirrorError::InvalidQuery("--s3-bucket is required for the s3 backend".to_string()))?;
            let backend = S3Backend::new(
                config.s3_endpoint.as_deref(),
                bucket,
                config.s3_credentials_file.as_deref(),
                config.s3_credentials_profile.as_deref(),
                config.s3_key_prefix.clone(),
                config.s3_delta_markers,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

fn request_platforms(config: &Config, explicit: Vec<String>) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit;
    }
    config.default_platform.clone().into_iter().collect()
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.to_config();
    let backend = build_backend(&config).await?;
    let cache = Cache::open(&config.cache_path).await?;
    let upstream: Arc<dyn UpstreamClient> =
        Arc::new(HttpUpstreamClient::new(UPSTREAM_QUERY_URL, UPSTREAM_GALLERY_HOST)?);
    let pipeline = Pipeline::new(backend.clone(), cache.clone(), upstream).with_concurrency(config.concurrent_extensions);

    match cli.command {
        Command::Add {
            uid,
            target_platforms,
            pre_release,
            force,
        } => {
            let uid: UniqueId = uid.parse()?;
            let request = AcquireRequest {
                uid,
                version: None,
                target_platforms: request_platforms(&config, target_platforms),
                pre_release,
                force,
            };
            pipeline.acquire_one(request).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Update {
            uid,
            target_platforms,
            pre_release,
        } => {
            let target_platforms = request_platforms(&config, target_platforms);
            let uids = match uid {
                Some(uid) => vec![uid.parse()?],
                None => backend.list_unique_ids().await?,
            };
            let requests: Vec<AcquireRequest> = uids
                .into_iter()
                .map(|uid| AcquireRequest {
                    uid,
                    version: None,
                    target_platforms: target_platforms.clone(),
                    pre_release,
                    force: false,
                })
                .collect();
            let results = pipeline.run_batch(requests).await;
            report_batch(&results)
        }
        Command::Remove { tag } => {
            let tag = tag.parse()?;
            backend.remove(&tag).await?;
            cache.delete(&tag).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::List { prefix } => {
            let uids = backend.list_unique_ids().await?;
            for uid in uids {
                let uid_str = uid.to_string();
                let matches = match &prefix {
                    Some(p) => uid_str.starts_with(p.as_str()),
                    None => true,
                };
                if matches {
                    println!("{uid_str}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Search { text, limit } => {
            let query = domain::query::Query::latest_by_text(&text, limit, domain::query::SortBy::InstallCount);
            let result = cache.run(&query).await?;
            for extension in result.extensions {
                println!("{} — {}", extension.uid, extension.display_name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Info { uid } => {
            let uid: UniqueId = uid.parse()?;
            let extension = cache.find_by_unique_id(&uid).await?;
            println!("{}", serde_json::to_string_pretty(&extension)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Versions { uid } => {
            let uid: UniqueId = uid.parse()?;
            for tag in cache.list_version_tags(&uid.to_string()).await? {
                println!("{tag}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let shutdown = tokio_util::sync::CancellationToken::new();
            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    signal_shutdown.cancel();
                }
            });
            server::serve(&config, backend, cache, shutdown).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Reindex => {
            let failures = reindex::reindex(backend, &cache).await?;
            for failure in &failures {
                error!("{failure}");
            }
            if failures.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
            }
        }
        Command::Prune => prune(backend.as_ref(), &cache).await,
    }
}

fn report_batch(results: &[Result<()>]) -> Result<ExitCode> {
    let failed = results.iter().filter(|r| r.is_err()).count();
    for result in results {
        if let Err(e) = result {
            error!("{e}");
        }
    }
    if failed == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    }
}

/// Walks every tracked version tag, checking the valid-version invariant
/// (extension metadata, version metadata, and every declared asset all
/// load), and removes the ones that fail it from both the backend and the
/// cache.
async fn prune(backend: &dyn Backend, cache: &Cache) -> Result<ExitCode> {
    let mut pruned = 0usize;
    for uid in backend.list_unique_ids().await? {
        for tag in backend.list_version_tags(&uid).await? {
            if let Err(e) = validate_tag(backend, &tag).await {
                error!("pruning invalid version {tag}: {e}");
                backend.remove(&tag).await?;
                cache.delete(&tag).await?;
                pruned += 1;
            }
        }
    }
    info!("pruned {pruned} invalid version(s)");
    Ok(ExitCode::SUCCESS)
}

async fn validate_tag(backend: &dyn Backend, tag: &domain::VersionTag) -> Result<()> {
    let version_bytes = backend.load_version_metadata(tag).await?;
    let version: domain::Version = serde_json::from_slice(&version_bytes)?;
    for asset in &version.assets {
        backend.detect_asset_content_type(tag, asset.asset_type).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
