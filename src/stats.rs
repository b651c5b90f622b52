//! Knowledge base statistics and health overview.
//!
//! Provides a quick summary of what's indexed: row counts and embedding
//! dimensions per category, file sizes, and when and from what the index
//! was built. Used by `apidoc stats`. Loading the index pairs also checks
//! them for desync, so a clean `stats` run means the index is servable.

use anyhow::Result;
use apidoc_rag_core::Category;

use crate::config::Config;
use crate::store;

/// Run the stats command: load the knowledge base and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let dir = &config.index.dir;
    let kb = store::load(dir)?;
    let manifest = store::load_manifest(dir)?;

    println!("apidoc: Knowledge Base Stats");
    println!("============================");
    println!();
    println!("  Directory:   {}", dir.display());
    if let Some(m) = &manifest {
        println!("  Source:      {}", m.source);
        println!("  Model:       {}", m.model);
        println!("  Built:       {}", format_ts_relative(m.built_at));
    }
    println!();
    println!(
        "  {:<10} {:>6} {:>6} {:>10} {:>10}",
        "CATEGORY", "ROWS", "DIMS", "INDEX", "CHUNKS"
    );
    println!("  {}", "-".repeat(46));

    for category in Category::ALL {
        let idx = kb.get(category);
        let paths = store::category_paths(dir, category);
        let index_size = std::fs::metadata(&paths.index).map(|m| m.len()).unwrap_or(0);
        let chunks_size = std::fs::metadata(&paths.chunks).map(|m| m.len()).unwrap_or(0);
        println!(
            "  {:<10} {:>6} {:>6} {:>10} {:>10}",
            category.as_str(),
            idx.len(),
            idx.index().dims(),
            format_bytes(index_size),
            format_bytes(chunks_size)
        );
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_relative_timestamps() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
    }
}
