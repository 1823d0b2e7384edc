//! Progress bars driven by transfer events

use bferry_core::TransferManager;
use bferry_types::{TransferEvent, TransferKind};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Renders one operation's events
pub struct TransferProgress {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
    items: HashMap<usize, ProgressBar>,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            overall: None,
            items: HashMap::new(),
        }
    }

    fn style(template: &str) -> ProgressStyle {
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ")
    }

    pub fn handle_event(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::OperationStarted {
                items, total_bytes, ..
            } => {
                let bar = match total_bytes {
                    Some(total) => {
                        let bar = ProgressBar::new(*total);
                        bar.set_style(Self::style(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                        ));
                        bar
                    }
                    None => {
                        let bar = ProgressBar::new(*items as u64);
                        bar.set_style(Self::style(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items",
                        ));
                        bar
                    }
                };
                bar.enable_steady_tick(Duration::from_millis(120));
                self.overall = Some(self.multi.add(bar));
            }

            TransferEvent::ItemStarted { kind, index, name } => {
                // Chunks are shown through the overall byte bar
                if *kind == TransferKind::DownloadLarge {
                    return;
                }
                let spinner = self.multi.add(ProgressBar::new_spinner());
                spinner.set_style(Self::style("  {spinner:.cyan} {msg}"));
                spinner.enable_steady_tick(Duration::from_millis(120));
                spinner.set_message(name.clone());
                self.items.insert(*index, spinner);
            }

            TransferEvent::ItemCompleted { kind, index, bytes } => {
                if let Some(spinner) = self.items.remove(index) {
                    spinner.finish_with_message(format!(
                        "{} {} ({})",
                        style("✓").green().bold(),
                        spinner.message(),
                        human_bytes::human_bytes(*bytes as f64)
                    ));
                }
                if *kind != TransferKind::DownloadLarge {
                    self.advance(1);
                }
            }

            TransferEvent::ItemFailed { kind, index, error } => {
                if let Some(spinner) = self.items.remove(index) {
                    spinner.abandon_with_message(format!(
                        "{} {}: {}",
                        style("✗").red().bold(),
                        spinner.message(),
                        error
                    ));
                }
                if *kind != TransferKind::DownloadLarge {
                    self.advance(1);
                }
            }

            TransferEvent::ChunkWritten { start, end, .. } => {
                self.advance(end - start + 1);
            }

            TransferEvent::OperationFinished { failed, .. } => {
                if let Some(bar) = self.overall.take() {
                    if *failed == 0 {
                        bar.finish();
                    } else {
                        bar.abandon();
                    }
                }
            }
        }
    }

    fn advance(&self, delta: u64) {
        if let Some(ref bar) = self.overall {
            bar.inc(delta);
        }
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task rendering a manager's events until told to stop
pub struct ProgressTask {
    done: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressTask {
    pub fn start(manager: &TransferManager) -> Self {
        let rx = manager.subscribe();
        let done = CancellationToken::new();
        let handle = tokio::spawn(render(rx, done.clone()));
        Self { done, handle }
    }

    /// Render any queued events, then stop
    pub async fn finish(self) {
        self.done.cancel();
        let _ = self.handle.await;
    }
}

async fn render(mut rx: broadcast::Receiver<TransferEvent>, done: CancellationToken) {
    let mut progress = TransferProgress::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!("Progress skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = done.cancelled() => {
                while let Ok(event) = rx.try_recv() {
                    progress.handle_event(&event);
                }
                break;
            }
        }
    }
}
