//! Keyword classifier suggesting a chart kind for a metric definition

use super::ChartKind;

/// Keyword rules in priority order. The first rule with a keyword contained in
/// the metric text decides the kind; later rules are not consulted.
pub const KEYWORD_RULES: &[(ChartKind, &[&str])] = &[
    // Time series
    (
        ChartKind::Line,
        &[
            "date",
            "month",
            "year",
            "daily",
            "weekly",
            "monthly",
            "quarterly",
            "annually",
        ],
    ),
    // Percentage / distribution
    (
        ChartKind::Pie,
        &["rate", "ratio", "percentage", "%", "share", "distribution"],
    ),
    // Comparison
    (ChartKind::Bar, &["by", "per", "across", "between", "compare"]),
    // Aggregation
    (
        ChartKind::Metric,
        &["sum", "count", "avg", "average", "total"],
    ),
];

/// Suggest a chart kind for a metric from its calculation method and name.
///
/// Matching is a case-insensitive substring test, so "by" also matches inside
/// longer words. Text that matches no rule is shown as a single value.
pub fn classify(calculation_method: &str, name: &str) -> ChartKind {
    let text = format!("{} {}", calculation_method, name).to_lowercase();

    KEYWORD_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ChartKind::Metric)
}
