//! Chart kinds shared by the classifier, the reply protocol and the transformer
//!
//! `ChartKind` is the single list of chart tags the application understands. The
//! system instruction sent to the completion service enumerates it, the parser
//! resolves reply tags against it and the transformer dispatches on it, so adding
//! a kind here is the only change needed to teach every stage about it.

mod classify;
pub mod palettes;

pub use classify::{classify, KEYWORD_RULES};

use crate::{ChatsqlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The shape used to render a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Time trends
    Line,
    /// Grouped comparisons
    Bar,
    /// Proportions of a whole
    Pie,
    /// A single value
    Metric,
}

impl ChartKind {
    /// All chart kinds, in the order they are presented to the completion service
    pub const ALL: [ChartKind; 4] = [
        ChartKind::Metric,
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
    ];

    /// The protocol tag for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Pie => "pie",
            ChartKind::Metric => "metric",
        }
    }

    /// Human-readable name shown next to a suggested chart
    pub fn label(&self) -> &'static str {
        match self {
            ChartKind::Line => "Time Series",
            ChartKind::Bar => "Comparison",
            ChartKind::Pie => "Distribution",
            ChartKind::Metric => "Single Value",
        }
    }

    /// When to pick this kind, phrased for the system instruction
    pub fn usage_hint(&self) -> &'static str {
        match self {
            ChartKind::Line => "For time trends (e.g., monthly revenue)",
            ChartKind::Bar => "For grouped comparisons (e.g., sales by category)",
            ChartKind::Pie => "For proportions (e.g., revenue share by region)",
            ChartKind::Metric => "For single values (e.g., total sales, customer count)",
        }
    }

    /// Resolve a chart tag taken from a completion reply.
    ///
    /// An absent or blank tag means "no chart". Any other tag that is not a known
    /// kind falls back to [`ChartKind::Line`], so a reply that asks for a chart
    /// always gets one.
    pub fn resolve(tag: Option<&str>) -> Option<ChartKind> {
        let tag = tag?.trim();
        if tag.is_empty() {
            return None;
        }
        Some(tag.parse().unwrap_or(ChartKind::Line))
    }

    /// The tags joined with `|`, e.g. `metric|bar|line|pie`
    pub fn tag_list() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = ChatsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartKind::Line),
            "bar" => Ok(ChartKind::Bar),
            "pie" => Ok(ChartKind::Pie),
            "metric" => Ok(ChartKind::Metric),
            other => Err(ChatsqlError::ValidationError(format!(
                "Unknown chart type '{}'. Valid types: {}",
                other,
                ChartKind::tag_list()
            ))),
        }
    }
}
