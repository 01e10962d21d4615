//! Inspect command implementation.

use super::{print_items, CliError, ItemLine, OutputFormat};
use chrono::{DateTime, Utc};
use quotecart_core::{CartMetadata, CartState, FORMAT_VERSION};
use quotecart_sync::{CartPersistence, FilePersistence};
use serde::Serialize;
use std::path::Path;

/// Cart inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Cart file path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Encoding format version.
    pub format_version: u16,
    /// Sync status when the cart was saved.
    pub sync_status: String,
    /// Remote version the cart last agreed on, if it ever synced.
    pub baseline_version: Option<u64>,
    /// Lines in display order.
    pub items: Vec<ItemLine>,
    /// Aggregate metadata.
    pub metadata: CartMetadata,
    /// Number of retained history snapshots.
    pub history_len: usize,
    /// History capacity.
    pub history_capacity: usize,
    /// Whether an undo step is available.
    pub can_undo: bool,
    /// Whether a redo step is available.
    pub can_redo: bool,
    /// History entries (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

/// One retained history snapshot.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    /// Snapshot sequence.
    pub sequence: u64,
    /// Action that produced the snapshot.
    pub action: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Number of lines in the snapshot.
    pub item_count: usize,
    /// Whether this is the current position.
    pub current: bool,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_history: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = FilePersistence::new(path)
        .load()?
        .ok_or_else(|| CliError::NoCart(path.display().to_string()))?;
    let file_size = std::fs::metadata(path)?.len();
    let result = inspect(path, file_size, &state, show_history);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path, file_size: u64, state: &CartState, show_history: bool) -> InspectResult {
    let cursor = state.history.cursor_sequence();
    let history = show_history.then(|| {
        state
            .history
            .snapshots()
            .map(|snapshot| HistoryEntry {
                sequence: snapshot.sequence,
                action: snapshot.action.clone(),
                timestamp: snapshot.timestamp,
                item_count: snapshot.items.len(),
                current: Some(snapshot.sequence) == cursor,
            })
            .collect()
    });

    InspectResult {
        path: path.display().to_string(),
        file_size,
        format_version: FORMAT_VERSION,
        sync_status: state.sync_status.to_string(),
        baseline_version: state.sync_baseline.as_ref().map(|b| b.version),
        items: state.items.iter().map(ItemLine::from).collect(),
        metadata: state.metadata.clone(),
        history_len: state.history.len(),
        history_capacity: state.history.capacity(),
        can_undo: state.history.can_undo(),
        can_redo: state.history.can_redo(),
        history,
    }
}

fn print_text_output(result: &InspectResult) {
    println!("QuoteCart Cart Inspection");
    println!("=========================");
    println!();
    println!("Path:         {}", result.path);
    println!("File size:    {} bytes", result.file_size);
    println!("Format:       v{}", result.format_version);
    println!("Sync status:  {}", result.sync_status);
    match result.baseline_version {
        Some(version) => println!("Synced at:    remote v{}", version),
        None => println!("Synced at:    never"),
    }
    println!("Strategy:     {}", result.metadata.conflict_strategy);
    if let Some(synced) = result.metadata.last_synced_at {
        println!("Last synced:  {}", synced.to_rfc3339());
    }
    println!();
    println!("Items ({}):", result.metadata.total_items);
    print_items(&result.items);
    println!();
    println!(
        "Total:        {} {}",
        result.metadata.total_value, result.metadata.base_currency
    );
    if let Some(shipping) = result.metadata.shipping_estimate {
        println!("Shipping:     {}", shipping);
    }
    if let Some(tax) = result.metadata.tax_estimate {
        println!("Tax:          {}", tax);
    }
    println!();
    println!(
        "History:      {}/{} snapshots (undo: {}, redo: {})",
        result.history_len,
        result.history_capacity,
        if result.can_undo { "yes" } else { "no" },
        if result.can_redo { "yes" } else { "no" }
    );

    if let Some(history) = &result.history {
        for entry in history {
            let marker = if entry.current { "*" } else { " " };
            println!(
                "  {} #{:<4} {:<12} {:>3} items  {}",
                marker,
                entry.sequence,
                entry.action,
                entry.item_count,
                entry.timestamp.to_rfc3339()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotecart_core::{CartConfig, CartItem, Quote};
    use rust_decimal::Decimal;

    #[test]
    fn inspect_reports_items_and_history() {
        let now = Utc::now();
        let items = vec![CartItem::new(
            Quote::new("Q-1", "Quote 1", Decimal::new(1500, 2)),
            None,
            now,
        )];
        let state = CartState::with_items(&CartConfig::default(), items, now);

        let result = inspect(Path::new("cart.cbor"), 128, &state, true);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.metadata.total_value, Decimal::new(1500, 2));
        assert_eq!(result.format_version, FORMAT_VERSION);
        let history = result.history.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].current);
        assert!(!result.can_undo);
        assert_eq!(result.baseline_version, None);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = run(Path::new("/nonexistent/cart.cbor"), false, OutputFormat::Text).unwrap_err();
        assert!(err.to_string().contains("no cart found"));
    }
}
