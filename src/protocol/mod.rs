//! Reply protocol between the completion service and the application
//!
//! The completion service is instructed (see [`SystemPrompt`]) to wrap any SQL it
//! wants executed in delimited sections:
//!
//! ```text
//! ---EXPLANATION---
//! Revenue per region.
//! ---SQL---
//! SELECT region, SUM(amount) FROM sales GROUP BY region
//! ---END SQL---
//! ---CHART---
//! bar
//! ---END CHART---
//! ```
//!
//! Replies come from a text generator and are treated as untrusted input:
//! [`parse`] never fails. A reply without a complete SQL section is plain
//! conversation.

mod prompt;

pub use prompt::SystemPrompt;

use crate::chart::ChartKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const EXPLANATION_START: &str = "---EXPLANATION---";
pub const SQL_START: &str = "---SQL---";
pub const SQL_END: &str = "---END SQL---";
pub const CHART_START: &str = "---CHART---";
pub const CHART_END: &str = "---END CHART---";

// Lazy (non-greedy) bodies so a second block is never swallowed into the first
static SQL_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)---SQL---(.*?)---END SQL---").expect("valid regex"));
static CHART_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)---CHART---(.*?)---END CHART---").expect("valid regex"));
static EXPLANATION_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)---EXPLANATION---(.*?)(?:---SQL---|\z)").expect("valid regex")
});

/// A completion reply split into its protocol sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    /// Prose for the user
    pub explanation: String,
    /// Statement to execute, without a trailing semicolon
    pub sql: Option<String>,
    /// Raw chart tag, as written by the completion service
    pub chart_type: Option<String>,
}

impl ParsedResponse {
    /// The chart kind requested by the reply, if any
    pub fn chart_kind(&self) -> Option<ChartKind> {
        ChartKind::resolve(self.chart_type.as_deref())
    }
}

/// Split a completion reply into explanation, SQL and chart tag.
///
/// Only the first SQL section and the first chart section are honoured. An
/// unterminated section counts as absent.
pub fn parse(raw: &str) -> ParsedResponse {
    let sql_match = SQL_SECTION.captures(raw);

    let sql = sql_match
        .as_ref()
        .and_then(|caps| caps.get(1))
        .map(|body| strip_trailing_semicolon(body.as_str().trim()).trim().to_string());

    let chart_type = CHART_SECTION
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string());

    let explanation = if let Some(body) = EXPLANATION_SECTION
        .captures(raw)
        .and_then(|caps| caps.get(1))
    {
        body.as_str().trim().to_string()
    } else if let Some(whole) = sql_match.as_ref().and_then(|caps| caps.get(0)) {
        preceding_text(&raw[..whole.start()])
    } else {
        raw.trim().to_string()
    };

    ParsedResponse {
        explanation,
        sql,
        chart_type,
    }
}

/// Render sections in protocol form. Empty parts are omitted.
pub fn compose(explanation: &str, sql: Option<&str>, chart: Option<&str>) -> String {
    let mut out = Vec::new();
    if !explanation.is_empty() {
        out.push(format!("{}\n{}", EXPLANATION_START, explanation));
    }
    if let Some(sql) = sql {
        out.push(format!("{}\n{}\n{}", SQL_START, sql, SQL_END));
    }
    if let Some(chart) = chart {
        out.push(format!("{}\n{}\n{}", CHART_START, chart, CHART_END));
    }
    out.join("\n")
}

/// Remove exactly one trailing semicolon
pub(crate) fn strip_trailing_semicolon(sql: &str) -> &str {
    sql.strip_suffix(';').unwrap_or(sql)
}

/// Text ahead of the SQL section, without a chart section that may precede it
fn preceding_text(head: &str) -> String {
    let head = match head.find(CHART_START) {
        Some(idx) => &head[..idx],
        None => head,
    };
    head.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_conversation() {
        let parsed = parse("  Hi! I can answer questions about your data.  ");
        assert_eq!(parsed.sql, None);
        assert_eq!(parsed.chart_type, None);
        assert_eq!(parsed.explanation, "Hi! I can answer questions about your data.");
    }

    #[test]
    fn test_sql_and_chart() {
        let raw = "Here you go\n---SQL---\nSELECT region, SUM(amount) FROM sales GROUP BY region\n---END SQL---\n---CHART---\nbar\n---END CHART---";
        let parsed = parse(raw);
        assert_eq!(
            parsed.sql.as_deref(),
            Some("SELECT region, SUM(amount) FROM sales GROUP BY region")
        );
        assert_eq!(parsed.chart_type.as_deref(), Some("bar"));
        assert_eq!(parsed.chart_kind(), Some(ChartKind::Bar));
        assert_eq!(parsed.explanation, "Here you go");
    }

    #[test]
    fn test_single_trailing_semicolon_stripped() {
        let parsed = parse("---SQL---\nSELECT 1;\n---END SQL---");
        assert_eq!(parsed.sql.as_deref(), Some("SELECT 1"));

        let parsed = parse("---SQL---\nSELECT 1;;\n---END SQL---");
        assert_eq!(parsed.sql.as_deref(), Some("SELECT 1;"));
    }

    #[test]
    fn test_explanation_section() {
        let raw = "---EXPLANATION---\nCounting customers.\n---SQL---\nSELECT COUNT(*) FROM customers\n---END SQL---";
        let parsed = parse(raw);
        assert_eq!(parsed.explanation, "Counting customers.");
        assert_eq!(parsed.sql.as_deref(), Some("SELECT COUNT(*) FROM customers"));
    }

    #[test]
    fn test_explanation_section_without_sql_runs_to_end() {
        let parsed = parse("---EXPLANATION---\nNothing to query.");
        assert_eq!(parsed.explanation, "Nothing to query.");
        assert_eq!(parsed.sql, None);
    }

    #[test]
    fn test_sql_without_explanation_has_empty_explanation() {
        let parsed = parse("---SQL---\nSELECT 1\n---END SQL---\n---CHART---\nmetric\n---END CHART---");
        assert_eq!(parsed.explanation, "");
        assert_eq!(parsed.chart_kind(), Some(ChartKind::Metric));
    }

    #[test]
    fn test_chart_before_sql_is_not_explanation() {
        let raw = "Totals\n---CHART---\nmetric\n---END CHART---\n---SQL---\nSELECT 1\n---END SQL---";
        let parsed = parse(raw);
        assert_eq!(parsed.explanation, "Totals");
        assert_eq!(parsed.chart_type.as_deref(), Some("metric"));
    }

    #[test]
    fn test_only_first_sql_block_is_used() {
        let raw = "---SQL---\nSELECT 1\n---END SQL---\ntext\n---SQL---\nSELECT 2\n---END SQL---";
        let parsed = parse(raw);
        assert_eq!(parsed.sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_only_first_chart_block_is_used() {
        let raw = "---SQL---\nSELECT 1\n---END SQL---\n---CHART---\npie\n---END CHART---\n---CHART---\nbar\n---END CHART---";
        assert_eq!(parse(raw).chart_type.as_deref(), Some("pie"));
    }

    #[test]
    fn test_unterminated_sql_is_conversation() {
        let raw = "Let me check\n---SQL---\nSELECT * FROM orders";
        let parsed = parse(raw);
        assert_eq!(parsed.sql, None);
        assert_eq!(parsed.explanation, raw.trim());
    }

    #[test]
    fn test_end_marker_without_start() {
        let parsed = parse("SELECT 1\n---END SQL---");
        assert_eq!(parsed.sql, None);
    }

    #[test]
    fn test_unterminated_chart() {
        let parsed = parse("---SQL---\nSELECT 1\n---END SQL---\n---CHART---\nbar");
        assert_eq!(parsed.sql.as_deref(), Some("SELECT 1"));
        assert_eq!(parsed.chart_type, None);
    }

    #[test]
    fn test_compose_round_trip() {
        let text = compose("Revenue by region.", Some("SELECT region, SUM(x) FROM t GROUP BY 1"), Some("bar"));
        let parsed = parse(&text);
        assert_eq!(parsed.explanation, "Revenue by region.");
        assert_eq!(parsed.sql.as_deref(), Some("SELECT region, SUM(x) FROM t GROUP BY 1"));
        assert_eq!(parsed.chart_type.as_deref(), Some("bar"));
    }

    fn marker_free() -> impl Strategy<Value = String> {
        // Trimmed text without dashes cannot contain or touch a marker
        "[A-Za-z0-9(),*= ]{0,40}".prop_map(|s| s.trim().to_string())
    }

    proptest! {
        #[test]
        fn parse_never_panics(raw in ".*") {
            let _ = parse(&raw);
        }

        #[test]
        fn parse_survives_mangled_markers(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just(SQL_START.to_string()),
                    Just(SQL_END.to_string()),
                    Just(CHART_START.to_string()),
                    Just(CHART_END.to_string()),
                    Just(EXPLANATION_START.to_string()),
                    Just("---".to_string()),
                    Just(";".to_string()),
                    "[a-z ]{0,8}",
                ],
                0..12,
            )
        ) {
            let raw = parts.concat();
            let parsed = parse(&raw);
            if let Some(sql) = parsed.sql {
                prop_assert!(!sql.contains(SQL_END));
            }
        }

        #[test]
        fn sql_section_is_extracted(body in "[A-Za-z0-9(),*= ]{1,40}", semi in proptest::bool::ANY) {
            let raw = format!("prefix {}{}{}{} suffix", SQL_START, body, if semi { ";" } else { "" }, SQL_END);
            let parsed = parse(&raw);
            prop_assert_eq!(parsed.sql, Some(body.trim().to_string()));
        }

        #[test]
        fn no_markers_means_no_sql(raw in "[^-]*") {
            let parsed = parse(&raw);
            prop_assert_eq!(parsed.sql, None);
            prop_assert_eq!(parsed.explanation, raw.trim().to_string());
        }

        #[test]
        fn compose_then_parse_recovers_parts(
            explanation in marker_free().prop_filter("non-empty", |s| !s.is_empty()),
            sql in marker_free().prop_filter("non-empty", |s| !s.is_empty()),
            chart in prop_oneof![Just("metric"), Just("bar"), Just("line"), Just("pie")],
        ) {
            let parsed = parse(&compose(&explanation, Some(&sql), Some(chart)));
            prop_assert_eq!(parsed.explanation, explanation);
            prop_assert_eq!(parsed.sql, Some(sql));
            prop_assert_eq!(parsed.chart_type.as_deref(), Some(chart));
        }
    }
}
