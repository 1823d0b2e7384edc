//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use serde::Serialize;

/// Outcome of one item of a transfer
#[derive(Debug, Serialize)]
pub struct TransferRecord {
    /// Source path or object name
    pub item: String,
    /// Object name or local path the item landed at
    pub target: Option<String>,
    pub bytes: Option<u64>,
    pub error: Option<String>,
}

/// Print per-item outcomes in the specified format
pub fn print_records(records: &[TransferRecord], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct TransferRow {
                item: String,
                target: String,
                size: String,
                status: String,
            }

            let rows: Vec<TransferRow> = records
                .iter()
                .map(|r| TransferRow {
                    item: truncate(&r.item, 40),
                    target: r.target.as_deref().map(|t| truncate(t, 40)).unwrap_or_default(),
                    size: r.bytes.map(format_bytes).unwrap_or_else(|| "-".to_string()),
                    status: match r.error {
                        Some(ref e) => format!("failed: {}", e),
                        None => "ok".to_string(),
                    },
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for record in records {
                match record.error {
                    None => println!(
                        "{} {} {} {}",
                        style("✓").green().bold(),
                        record.item,
                        style("→").dim(),
                        style(record.target.as_deref().unwrap_or("-")).cyan(),
                    ),
                    Some(ref error) => println!(
                        "{} {} {}",
                        style("✗").red().bold(),
                        record.item,
                        style(error).red()
                    ),
                }
            }

            let failed = records.iter().filter(|r| r.error.is_some()).count();
            let bytes: u64 = records.iter().filter_map(|r| r.bytes).sum();
            println!();
            println!(
                "{} succeeded, {} failed, {} transferred",
                style(records.len() - failed).bold(),
                style(failed).bold(),
                format_bytes(bytes)
            );
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}
