//! Cache command - inspect and evict cached artifacts

use crate::cache::{ArtifactStore, EntryInfo};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use console::style;
use std::path::Path;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, project_dir: &Path) -> KilnResult<()> {
    let root = ConfigManager::cache_dir(config, project_dir);
    debug!("Cache directory: {}", root.display());
    let store = ArtifactStore::new(root);

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&store, config, days, dry_run).await,
        CacheAction::Clear { yes } => clear_entries(&store, yes).await,
    }
}

/// List all cache entries
async fn list_entries(store: &ArtifactStore, format: OutputFormat) -> KilnResult<()> {
    let entries = store.list().await?;

    match format {
        OutputFormat::Table => print_entry_table(store, &entries),
        OutputFormat::Json => print_entry_json(&entries)?,
    }

    Ok(())
}

fn print_entry_table(store: &ArtifactStore, entries: &[EntryInfo]) {
    if entries.is_empty() {
        println!("No cache entries in {}.", store.root().display());
        return;
    }

    println!(
        "{:<8} {:<16} {:>10} {:<20}",
        "KIND", "KEY", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(57));

    for entry in entries {
        let created = entry.created_at.format("%Y-%m-%d %H:%M").to_string();
        println!(
            "{:<8} {:<16} {:>10} {:<20}",
            entry.namespace,
            &entry.key[..16.min(entry.key.len())],
            format_bytes(entry.size),
            created
        );
    }

    println!();
    println!("Total: {} entries", entries.len());
}

fn print_entry_json(entries: &[EntryInfo]) -> KilnResult<()> {
    #[derive(serde::Serialize)]
    struct EntryJson {
        kind: String,
        key: String,
        size: u64,
        path: String,
        created_at: String,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            kind: e.namespace.to_string(),
            key: e.key.clone(),
            size: e.size,
            path: e.path.display().to_string(),
            created_at: e.created_at.to_rfc3339(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

/// Evict entries older than the configured age
async fn gc_entries(
    store: &ArtifactStore,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> KilnResult<()> {
    let gc_days = days_override.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    let expired = store.gc(gc_days, dry_run).await?;

    if expired.is_empty() {
        println!("No entries older than {} days.", gc_days);
        return Ok(());
    }

    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!("{} {} entries older than {} days:", verb, expired.len(), gc_days);
    for entry in &expired {
        println!(
            "  {} {}/{} ({} days old)",
            style("•").red(),
            entry.namespace,
            &entry.key[..16.min(entry.key.len())],
            entry.age_days()
        );
    }

    if dry_run {
        println!();
        println!("Dry run - no entries removed.");
    }

    Ok(())
}

/// Remove every entry
async fn clear_entries(store: &ArtifactStore, yes: bool) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let entries = store.list().await?;

    if entries.is_empty() {
        println!("No cache entries to clear.");
        return Ok(());
    }

    let prompt = format!(
        "Remove {} cache entries from {}?",
        entries.len(),
        store.root().display()
    );
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::step_info(&ctx, "Aborted");
        return Ok(());
    }

    let removed = store.clear().await?;
    ui::step_ok(&ctx, &format!("Removed {} cache entries", removed));
    Ok(())
}

/// Human-readable byte size
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
