//! CLI command implementations.

pub mod demo;
pub mod inspect;

use chrono::{DateTime, Utc};
use quotecart_core::CartItem;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the CLI itself.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unrecognized `--format` value.
    #[error("unknown output format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// Unrecognized `--strategy` value.
    #[error("unknown conflict strategy '{0}'")]
    UnknownStrategy(String),

    /// No cart file at the path.
    #[error("no cart found at {0}")]
    NoCart(String),
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}

/// One cart line as printed by the commands.
#[derive(Debug, Serialize)]
pub struct ItemLine {
    /// Line ID.
    pub id: String,
    /// Quote ID.
    pub quote: String,
    /// Quote reference.
    pub reference: String,
    /// Quote total.
    pub total: Decimal,
    /// When the line was added.
    pub added_at: DateTime<Utc>,
}

impl From<&CartItem> for ItemLine {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id.to_string(),
            quote: item.quote.id.to_string(),
            reference: item.quote.reference.clone(),
            total: item.quote.total,
            added_at: item.added_at,
        }
    }
}

fn print_items(items: &[ItemLine]) {
    if items.is_empty() {
        println!("  (empty)");
    }
    for item in items {
        println!("  {:<12} {:<24} {:>12}", item.quote, item.reference, item.total);
    }
}
