//! CLI command implementations

use crate::config;
use crate::output::{format_bytes, print_records, TransferRecord};
use crate::progress::ProgressTask;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use bferry_core::{TransferBatch, TransferManager};
use bferry_types::{
    DownloadLargeOptions, DownloadManyOptions, ObjectHandle, Settings, StoreSettings,
    UploadManyOptions, UploadOptions,
};
use console::style;
use std::path::{Path, PathBuf};

pub struct UploadArgs {
    pub prefix: Option<String>,
    pub skip_if_exists: bool,
    pub content_type: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
}

pub struct DownloadArgs {
    pub prefix: Option<PathBuf>,
    pub strip_prefix: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout: Option<u64>,
}

pub struct DownloadLargeArgs {
    pub chunk_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub dir: Option<PathBuf>,
    pub timeout: Option<u64>,
}

fn bucket_name(manager: &TransferManager) -> String {
    manager.store().bucket().to_string()
}

/// Progress bars only make sense for human output
fn start_progress(manager: &TransferManager, format: OutputFormat) -> Option<ProgressTask> {
    match format {
        OutputFormat::Human => Some(ProgressTask::start(manager)),
        OutputFormat::Json | OutputFormat::Table => None,
    }
}

async fn stop_progress(progress: Option<ProgressTask>) {
    if let Some(progress) = progress {
        progress.finish().await;
    }
}

/// Turn a settled batch into a command result after printing it
fn report<T>(
    batch: TransferBatch<T>,
    items: Vec<String>,
    describe: impl Fn(usize, &T) -> (String, u64),
    format: OutputFormat,
) -> Result<()> {
    let records: Vec<TransferRecord> = items
        .into_iter()
        .zip(batch.results.iter())
        .enumerate()
        .map(|(index, (item, result))| match result {
            Ok(value) => {
                let (target, bytes) = describe(index, value);
                TransferRecord {
                    item,
                    target: Some(target),
                    bytes: Some(bytes),
                    error: None,
                }
            }
            Err(e) => TransferRecord {
                item,
                target: None,
                bytes: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    print_records(&records, format)?;
    batch.into_result().map(|_| ()).map_err(Into::into)
}

// ============================================================================
// Transfer Commands
// ============================================================================

pub async fn upload(
    manager: &TransferManager,
    settings: &Settings,
    paths: Vec<PathBuf>,
    args: UploadArgs,
    format: OutputFormat,
) -> Result<()> {
    let options = UploadManyOptions {
        concurrency_limit: args.concurrency.unwrap_or(settings.concurrency_limit),
        prefix: args.prefix,
        skip_if_exists: args.skip_if_exists,
        pass_through: UploadOptions {
            content_type: args.content_type,
            ..Default::default()
        },
        timeout_secs: args.timeout.or(settings.timeout_secs),
    };

    let items: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    let progress = start_progress(manager, format);
    let batch = manager.upload_many_settled(paths, options).await;
    stop_progress(progress).await;

    report(
        batch?,
        items,
        |_, (handle, meta)| (handle.to_string(), meta.size),
        format,
    )
}

pub async fn download(
    manager: &TransferManager,
    settings: &Settings,
    names: Vec<String>,
    args: DownloadArgs,
    format: OutputFormat,
) -> Result<()> {
    // Without either naming option, objects land in the download directory
    let prefix = match (args.prefix, &args.strip_prefix) {
        (Some(prefix), _) => Some(prefix),
        (None, None) => Some(settings.download_dir.clone()),
        (None, Some(_)) => None,
    };
    let options = DownloadManyOptions {
        concurrency_limit: args.concurrency.unwrap_or(settings.concurrency_limit),
        prefix: prefix.clone(),
        strip_prefix: args.strip_prefix.clone(),
        pass_through: Default::default(),
        timeout_secs: args.timeout.or(settings.timeout_secs),
    };

    let bucket = bucket_name(manager);
    let objects: Vec<ObjectHandle> = names
        .iter()
        .map(|name| ObjectHandle::new(bucket.clone(), name.clone()))
        .collect();

    let progress = start_progress(manager, format);
    let batch = manager.download_many_settled(objects, options).await;
    stop_progress(progress).await;

    let targets: Vec<String> = names
        .iter()
        .map(|name| local_target(prefix.as_deref(), args.strip_prefix.as_deref(), name))
        .collect();

    report(
        batch?,
        names,
        |index, contents| (targets[index].clone(), contents.len() as u64),
        format,
    )
}

/// Where `name` was written, mirroring the manager's naming rules
fn local_target(prefix: Option<&Path>, strip_prefix: Option<&str>, name: &str) -> String {
    if let Some(strip) = strip_prefix {
        return bferry_core::paths::strip_literal_prefix(name, strip).to_string();
    }
    match prefix {
        Some(prefix) => bferry_core::paths::download_destination(prefix, None, name)
            .display()
            .to_string(),
        None => name.to_string(),
    }
}

pub async fn download_large(
    manager: &TransferManager,
    settings: &Settings,
    name: &str,
    args: DownloadLargeArgs,
    format: OutputFormat,
) -> Result<()> {
    let directory = args.dir.unwrap_or_else(|| settings.download_dir.clone());
    let options = DownloadLargeOptions {
        concurrency_limit: args.concurrency.unwrap_or(settings.concurrency_limit),
        chunk_size_bytes: args.chunk_size.unwrap_or(settings.chunk_size_bytes),
        destination_dir: Some(directory.clone()),
        timeout_secs: args.timeout.or(settings.timeout_secs),
    };
    let object = ObjectHandle::new(bucket_name(manager), name);
    let target = directory.join(object.base_name());

    let progress = start_progress(manager, format);
    let result = manager.download_large(&object, options).await;
    stop_progress(progress).await;

    let record = match result {
        Ok(ref contents) => TransferRecord {
            item: name.to_string(),
            target: Some(target.display().to_string()),
            bytes: Some(contents.len() as u64),
            error: None,
        },
        Err(ref e) => TransferRecord {
            item: name.to_string(),
            target: None,
            bytes: None,
            error: Some(e.to_string()),
        },
    };
    print_records(std::slice::from_ref(&record), format)?;
    result.map(|_| ()).map_err(Into::into)
}

pub async fn stat(manager: &TransferManager, name: &str, format: OutputFormat) -> Result<()> {
    let object = ObjectHandle::new(bucket_name(manager), name);
    let meta = manager.store().get_metadata(&object).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct MetaRow {
                name: String,
                size: String,
                generation: i64,
                content_type: String,
                updated: String,
            }

            let row = MetaRow {
                name: meta.name.clone(),
                size: format_bytes(meta.size),
                generation: meta.generation,
                content_type: meta.content_type.clone().unwrap_or_default(),
                updated: meta.updated.map(|u| u.to_rfc3339()).unwrap_or_default(),
            };
            println!("{}", Table::new(vec![row]));
        }
        OutputFormat::Human => {
            println!("{}", style(&object).cyan().bold());
            println!("  Size: {} ({} bytes)", format_bytes(meta.size), meta.size);
            println!("  Generation: {}", meta.generation);
            println!("  Metageneration: {}", meta.metageneration);
            if let Some(ref content_type) = meta.content_type {
                println!("  Content type: {}", content_type);
            }
            if let Some(ref md5) = meta.md5_hash {
                println!("  MD5: {}", md5);
            }
            if let Some(updated) = meta.updated {
                println!("  Updated: {}", updated.to_rfc3339());
            }
            for (key, value) in &meta.metadata {
                println!("  {}: {}", style(key).dim(), value);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn config_action(
    path: &Path,
    settings: &Settings,
    action: ConfigAction,
    format: OutputFormat,
) -> Result<()> {
    match action {
        ConfigAction::Show => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(settings)?);
            }
            OutputFormat::Human | OutputFormat::Table => {
                println!("bferry Configuration:");
                println!();
                match settings.store {
                    StoreSettings::Fs {
                        ref bucket,
                        ref root,
                    } => {
                        println!("  Store: directory {}", root.display());
                        println!("  Bucket: {}", bucket);
                    }
                    StoreSettings::Http {
                        ref endpoint,
                        ref bucket,
                        ref token,
                    } => {
                        println!("  Store: {}", endpoint);
                        println!("  Bucket: {}", bucket);
                        println!(
                            "  Token: {}",
                            if token.is_some() { "set" } else { "not set" }
                        );
                    }
                }
                println!("  Concurrency limit: {}", settings.concurrency_limit);
                println!("  Chunk size: {}", format_bytes(settings.chunk_size_bytes));
                println!("  Download directory: {}", settings.download_dir.display());
                println!(
                    "  Timeout: {}",
                    settings
                        .timeout_secs
                        .map(|s| format!("{}s", s))
                        .unwrap_or_else(|| "none".to_string())
                );
            }
        },

        ConfigAction::Path => println!("{}", path.display()),

        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(anyhow!(
                    "Settings file {} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
            config::save_settings(path, settings)?;
            println!(
                "{} Wrote settings to {}",
                style("✓").green().bold(),
                style(path.display()).cyan()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_target_follows_naming_rules() {
        assert_eq!(local_target(None, Some("data/"), "data/a.csv"), "a.csv");
        assert_eq!(
            local_target(Some(Path::new("/dl")), None, "x/y.bin"),
            Path::new("/dl/x/y.bin").display().to_string()
        );
        assert_eq!(local_target(None, None, "plain"), "plain");
    }
}
