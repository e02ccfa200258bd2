//! Vega-Lite JSON writer implementation
//!
//! Converts chart series into Vega-Lite JSON for web-based interactive
//! visualizations.
//!
//! # Mapping Strategy
//!
//! - `line` → `line` mark, labels on an ordered nominal x axis
//! - `bar` → `bar` mark
//! - `pie` → `arc` mark, theta from values, color from labels
//! - `metric` → a single large `text` mark
//! - labels + first dataset → inline `data.values` rows of `{label, value}`
//!
//! # Example
//!
//! ```rust,ignore
//! use chatsql::writer::{Writer, VegaLiteWriter};
//!
//! let writer = VegaLiteWriter::new();
//! let vega_json = writer.write(&visualization)?;
//! // Can be rendered in browser with vega-embed
//! ```

use serde_json::{json, Value};

use crate::chart::{palettes, ChartKind};
use crate::visualization::{Colors, Dataset, Visualization};
use crate::writer::Writer;
use crate::{ChatsqlError, Result};

const LABEL_FIELD: &str = "label";
const VALUE_FIELD: &str = "value";

/// Vega-Lite JSON writer
///
/// Generates Vega-Lite v6 specifications from visualizations.
pub struct VegaLiteWriter {
    /// Vega-Lite schema version
    schema: String,
}

impl VegaLiteWriter {
    /// Create a new Vega-Lite writer with default settings
    pub fn new() -> Self {
        Self {
            schema: "https://vega.github.io/schema/vega-lite/v6.json".to_string(),
        }
    }

    /// Render into a JSON value rather than a string
    pub fn to_value(&self, viz: &Visualization) -> Result<Value> {
        self.validate(viz)?;

        let dataset = viz
            .data
            .datasets
            .first()
            .ok_or_else(|| ChatsqlError::WriterError("Visualization has no datasets".to_string()))?;

        let mut vl_spec = json!({
            "$schema": self.schema,
            "width": "container",
            "height": "container",
            "data": { "values": data_values(viz, dataset) },
        });

        let brand = brand_color(dataset);
        match viz.kind {
            ChartKind::Metric => {
                vl_spec["mark"] = json!({
                    "type": "text",
                    "fontSize": 48,
                    "fontWeight": "bold",
                    "color": brand,
                });
                vl_spec["encoding"] = json!({
                    "text": { "field": VALUE_FIELD, "type": "quantitative", "format": ",.2~f" }
                });
            }
            ChartKind::Pie => {
                vl_spec["mark"] = json!({ "type": "arc" });
                vl_spec["encoding"] = json!({
                    "theta": { "field": VALUE_FIELD, "type": "quantitative" },
                    "color": {
                        "field": LABEL_FIELD,
                        "type": "nominal",
                        "sort": null,
                        "scale": { "range": pie_palette(dataset) }
                    }
                });
            }
            ChartKind::Bar => {
                vl_spec["mark"] = json!({ "type": "bar", "color": brand });
                vl_spec["encoding"] = xy_encoding();
            }
            ChartKind::Line => {
                let width = dataset.border_width.unwrap_or(2.0);
                vl_spec["mark"] = json!({
                    "type": "line",
                    "color": brand,
                    "strokeWidth": width,
                    // Smoothed like a tension > 0 spline
                    "interpolate": if dataset.tension.unwrap_or(0.0) > 0.0 { "monotone" } else { "linear" },
                    "point": dataset.point_radius.map(|r| r > 0.0).unwrap_or(false),
                });
                vl_spec["encoding"] = xy_encoding();
            }
        }

        if let Some(title) = &dataset.label {
            vl_spec["title"] = json!(title);
        }

        Ok(vl_spec)
    }
}

impl Default for VegaLiteWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer for VegaLiteWriter {
    type Output = String;

    fn write(&self, viz: &Visualization) -> Result<String> {
        let vl_spec = self.to_value(viz)?;
        serde_json::to_string_pretty(&vl_spec)
            .map_err(|e| ChatsqlError::WriterError(format!("Failed to serialize Vega-Lite JSON: {}", e)))
    }
}

/// Inline data rows; labels keep their query order
fn data_values(viz: &Visualization, dataset: &Dataset) -> Vec<Value> {
    if viz.kind == ChartKind::Metric {
        return dataset
            .data
            .iter()
            .map(|v| json!({ VALUE_FIELD: number(*v) }))
            .collect();
    }
    viz.data
        .labels
        .iter()
        .zip(dataset.data.iter())
        .map(|(label, v)| json!({ LABEL_FIELD: label, VALUE_FIELD: number(*v) }))
        .collect()
}

fn xy_encoding() -> Value {
    json!({
        "x": { "field": LABEL_FIELD, "type": "nominal", "sort": null, "title": null },
        "y": { "field": VALUE_FIELD, "type": "quantitative", "title": null }
    })
}

fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn brand_color(dataset: &Dataset) -> String {
    match (&dataset.border_color, &dataset.background_color) {
        (Some(color), _) => color.clone(),
        (None, Some(Colors::Single(color))) => color.clone(),
        (None, Some(Colors::Palette(colors))) if !colors.is_empty() => colors[0].clone(),
        _ => palettes::BRAND.to_string(),
    }
}

fn pie_palette(dataset: &Dataset) -> Vec<String> {
    match &dataset.background_color {
        Some(Colors::Palette(colors)) if !colors.is_empty() => {
            palettes::expand_palette(colors, dataset.data.len().max(1))
        }
        Some(Colors::Single(color)) => vec![color.clone()],
        _ => palettes::expand_palette(palettes::CATEGORICAL, dataset.data.len().max(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualization::to_visualization;
    use crate::Row;

    fn sales() -> Vec<Row> {
        vec![
            json!({"region": "east", "amount": 10}),
            json!({"region": "west", "amount": 20.5}),
            json!({"region": "north", "amount": "oops"}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
    }

    fn render(chart: &str) -> Value {
        let viz = to_visualization(&sales(), Some(chart)).unwrap();
        VegaLiteWriter::new().to_value(&viz).unwrap()
    }

    #[test]
    fn test_schema_and_data() {
        let vl = render("bar");
        assert_eq!(vl["$schema"], "https://vega.github.io/schema/vega-lite/v6.json");
        assert_eq!(vl["mark"]["type"], "bar");
        assert_eq!(vl["mark"]["color"], "#167147");

        let values = vl["data"]["values"].as_array().unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], json!({"label": "east", "value": 10.0}));
        // NaN has no JSON representation
        assert_eq!(values[2]["value"], Value::Null);
    }

    #[test]
    fn test_line_mark() {
        let vl = render("line");
        assert_eq!(vl["mark"]["type"], "line");
        assert_eq!(vl["mark"]["interpolate"], "monotone");
        assert_eq!(vl["mark"]["strokeWidth"], 2.0);
        assert_eq!(vl["mark"]["point"], false);
        assert_eq!(vl["encoding"]["x"]["sort"], Value::Null);
    }

    #[test]
    fn test_pie_uses_arc_and_palette() {
        let vl = render("pie");
        assert_eq!(vl["mark"]["type"], "arc");
        assert_eq!(vl["encoding"]["theta"]["field"], "value");
        let range = vl["encoding"]["color"]["scale"]["range"].as_array().unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[1], "#4E7BE9");
    }

    #[test]
    fn test_metric_is_text() {
        let rows = vec![json!({"total": 10}).as_object().unwrap().clone()];
        let viz = to_visualization(&rows, Some("metric")).unwrap();
        let vl = VegaLiteWriter::new().to_value(&viz).unwrap();
        assert_eq!(vl["mark"]["type"], "text");
        assert_eq!(vl["data"]["values"], json!([{"value": 10.0}]));
        assert!(vl["encoding"].get("x").is_none());
    }

    #[test]
    fn test_metric_of_text_label_is_null() {
        // Positional: the first column of sales() is the region name
        let vl = render("metric");
        assert_eq!(vl["data"]["values"], json!([{"value": null}]));
    }

    #[test]
    fn test_write_string_is_valid_json() {
        let viz = to_visualization(&sales(), Some("bar")).unwrap();
        let output = VegaLiteWriter::new().write(&viz).unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["mark"]["type"], "bar");
    }

    #[test]
    fn test_invalid_visualization_rejected() {
        let mut viz = to_visualization(&sales(), Some("bar")).unwrap();
        viz.data.labels.pop();
        assert!(VegaLiteWriter::new().write(&viz).is_err());
    }
}
