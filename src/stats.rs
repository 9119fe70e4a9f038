//! Index statistics: what is stored where.

use anyhow::Result;

use odoo_rag_core::store::IndexStore;

use crate::config::Config;
use crate::sqlite_store::{SqliteStore, META_ROOT};

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;

    let total = store.count().await?;
    let modules = store.modules().await?;
    let embedding = store.embedding_info().await?;
    let root = store.get_meta(META_ROOT).await?;
    let last_indexed = store.last_indexed_at().await?;

    let db_path = config.db_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("odoo-rag index");
    println!("==============");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    if let Some(root) = root {
        println!("  Root:        {}", root);
    }
    match embedding {
        Some((model, dims)) => println!("  Embedding:   {} ({} dims)", model, dims),
        None => println!("  Embedding:   (none)"),
    }
    println!(
        "  Indexed:     {}",
        last_indexed
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Documents:   {}", total);
    println!("  Modules:     {}", modules.len());

    if !modules.is_empty() {
        println!();
        println!(
            "  {:<32} {:>8} {:>6} {:>8} {:>6}",
            "MODULE", "ENTITIES", "VIEWS", "SCRIPTS", "TOTAL"
        );
        println!("  {}", "-".repeat(64));
        for m in &modules {
            println!(
                "  {:<32} {:>8} {:>6} {:>8} {:>6}",
                m.module,
                m.entities,
                m.views,
                m.scripts,
                m.total()
            );
        }
    }
    println!();

    store.pool().close().await;
    Ok(())
}

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

/// "3 hours ago" style, falling back to a date past 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, plural(mins))
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, plural(days))
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
    fn bytes_are_humanised() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
