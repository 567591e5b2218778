// System status display: shows DB stats, delivery counts, recent deliveries.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::db::models::{DeliveryRecord, DeliveryStatus};
use crate::db::DeliveryLog;

/// Print the "not initialized" hint when a SQLite file is missing.
/// Returns true when the caller should stop.
pub fn report_missing_sqlite(db_path: &str) -> bool {
    if Path::new(db_path).exists() {
        return false;
    }
    println!("Database: not initialized");
    println!("\nRun `autodm init` to set up the database.");
    true
}

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn DeliveryLog>, db_display: &str) -> Result<()> {
    // Database file size (SQLite only; a Postgres URL has no file)
    match std::fs::metadata(db_display) {
        Ok(meta) => println!("Database: {} ({})", db_display, format_bytes(meta.len())),
        Err(_) => println!("Database: {db_display}"),
    }

    let stats = db.get_stats().await?;
    println!(
        "Deliveries: {} sent, {} failed ({:.1}% success)",
        stats.total_sent.to_string().green(),
        stats.total_failed.to_string().red(),
        stats.success_rate
    );
    println!("Last 24 hours: {}", stats.last_24_hours);

    if !stats.top_posts.is_empty() {
        println!("Top posts:");
        for post in &stats.top_posts {
            println!("  {} ({} DMs)", post.post_id, post.dm_count);
        }
    }

    let recent = db.get_recent_deliveries(5).await?;
    if recent.is_empty() {
        println!("Recent deliveries: none yet");
        println!("  Run `autodm serve` and subscribe the webhook to start");
    } else {
        println!("Recent deliveries: {} most recent:", recent.len());
        for record in &recent {
            println!("  {}", describe(record));
        }
    }

    Ok(())
}

fn describe(record: &DeliveryRecord) -> String {
    let status = match record.status {
        DeliveryStatus::Sent => "sent".green(),
        DeliveryStatus::Failed => "failed".red(),
        DeliveryStatus::Queued => "queued".yellow(),
    };
    let mut line = format!(
        "{} user {} on post {} ({})",
        status, record.user_id, record.post_id, record.sent_at
    );
    if record.retry_count > 0 {
        line.push_str(&format!(", {} retries", record.retry_count));
    }
    if let Some(err) = &record.error_message {
        line.push_str(&format!(": {}", err.dimmed()));
    }
    line
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
