//! Result-to-chart shaping
//!
//! Turns the rows of a query result into the `{ type, data: { labels, datasets } }`
//! structure a charting front end consumes.
//!
//! By default columns are read by position: the first value of each row is the
//! label (or the sole value of a metric) and the second is the magnitude. Column
//! names are ignored. [`ColumnBinding::Named`] looks columns up by name instead
//! and reports a [`ChatsqlError::MissingColumn`] when one is absent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::chart::{palettes, ChartKind};
use crate::row::{self, Row};
use crate::{ChatsqlError, Result};

/// Chart-ready series data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub data: ChartData,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

/// One series of values plus its styling
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Unparseable cells are `NaN` and serialize as `null`
    #[serde(deserialize_with = "nullable_values")]
    pub data: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Colors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tension: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f64>,
}

// `null` is how serde_json writes NaN
fn nullable_values<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<f64>, D::Error> {
    let values: Vec<Option<f64>> = Vec::deserialize(d)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// A single color or one color per data point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Colors {
    Single(String),
    Palette(Vec<String>),
}

impl Visualization {
    /// Check the shape invariants of a visualization
    pub fn validate(&self) -> Result<()> {
        if self.kind == ChartKind::Metric {
            if !self.data.labels.is_empty() {
                return Err(ChatsqlError::ValidationError(
                    "Metric visualizations have no labels".to_string(),
                ));
            }
            if self.data.datasets.len() != 1 || self.data.datasets[0].data.len() != 1 {
                return Err(ChatsqlError::ValidationError(
                    "Metric visualizations hold exactly one value".to_string(),
                ));
            }
            return Ok(());
        }

        for (idx, dataset) in self.data.datasets.iter().enumerate() {
            if dataset.data.len() != self.data.labels.len() {
                return Err(ChatsqlError::ValidationError(format!(
                    "Dataset {} has {} values for {} labels",
                    idx + 1,
                    dataset.data.len(),
                    self.data.labels.len()
                )));
            }
        }
        Ok(())
    }
}

/// How the label and value columns are located in each row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ColumnBinding {
    /// First column is the label, second is the value
    #[default]
    Positional,
    /// Columns looked up by name
    Named { label: String, value: String },
}

/// Colors applied to generated datasets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartStyle {
    pub brand: String,
    pub palette: Vec<String>,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            brand: palettes::BRAND.to_string(),
            palette: palettes::CATEGORICAL.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl ChartStyle {
    /// Build a style from user-supplied CSS colors, normalized to hex
    pub fn from_css(brand: &str, palette: &[String]) -> Result<Self> {
        let palette = if palette.is_empty() {
            ChartStyle::default().palette
        } else {
            palettes::palette_to_hex(palette)?
        };
        Ok(Self {
            brand: palettes::color_to_hex(brand)?,
            palette,
        })
    }
}

/// Shapes rows into a [`Visualization`]
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    binding: ColumnBinding,
    style: ChartStyle,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, binding: ColumnBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_style(mut self, style: ChartStyle) -> Self {
        self.style = style;
        self
    }

    /// Shape `rows` for the chart tag of a reply.
    ///
    /// Returns `Ok(None)` when there are no rows or no chart was requested. A
    /// non-empty tag that is not a known kind renders as a line chart.
    pub fn transform(&self, rows: &[Row], chart_type: Option<&str>) -> Result<Option<Visualization>> {
        if rows.is_empty() {
            return Ok(None);
        }
        match ChartKind::resolve(chart_type) {
            Some(kind) => self.transform_kind(rows, kind).map(Some),
            None => Ok(None),
        }
    }

    /// Shape non-empty `rows` as a chart of the given kind
    pub fn transform_kind(&self, rows: &[Row], kind: ChartKind) -> Result<Visualization> {
        if kind == ChartKind::Metric {
            let first = rows.first().map(|r| self.metric_cell(r)).transpose()?.flatten();
            return Ok(Visualization {
                kind,
                data: ChartData {
                    labels: Vec::new(),
                    datasets: vec![Dataset {
                        data: vec![row::to_number(first)],
                        background_color: Some(Colors::Palette(vec![self.style.brand.clone()])),
                        ..Default::default()
                    }],
                },
            });
        }

        let mut labels = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());
        for r in rows {
            labels.push(row::to_label(self.label_cell(r)?));
            values.push(row::to_number(self.value_cell(r)?));
        }

        let mut dataset = Dataset {
            label: self.series_name(),
            data: values,
            ..Default::default()
        };
        match kind {
            ChartKind::Pie => {
                dataset.background_color = Some(Colors::Palette(self.style.palette.clone()));
            }
            ChartKind::Bar => {
                dataset.background_color = Some(Colors::Single(self.style.brand.clone()));
            }
            ChartKind::Line | ChartKind::Metric => {
                dataset.border_color = Some(self.style.brand.clone());
                dataset.tension = Some(0.4);
                dataset.point_radius = Some(0.0);
                dataset.border_width = Some(2.0);
            }
        }

        Ok(Visualization {
            kind,
            data: ChartData {
                labels,
                datasets: vec![dataset],
            },
        })
    }

    fn label_cell<'a>(&self, r: &'a Row) -> Result<Option<&'a Value>> {
        match &self.binding {
            ColumnBinding::Positional => Ok(row::value_at(r, 0)),
            ColumnBinding::Named { label, .. } => named(r, label).map(Some),
        }
    }

    fn value_cell<'a>(&self, r: &'a Row) -> Result<Option<&'a Value>> {
        match &self.binding {
            ColumnBinding::Positional => Ok(row::value_at(r, 1)),
            ColumnBinding::Named { value, .. } => named(r, value).map(Some),
        }
    }

    fn metric_cell<'a>(&self, r: &'a Row) -> Result<Option<&'a Value>> {
        match &self.binding {
            ColumnBinding::Positional => Ok(row::value_at(r, 0)),
            ColumnBinding::Named { value, .. } => named(r, value).map(Some),
        }
    }

    fn series_name(&self) -> Option<String> {
        match &self.binding {
            ColumnBinding::Positional => None,
            ColumnBinding::Named { value, .. } => Some(value.clone()),
        }
    }
}

fn named<'a>(r: &'a Row, column: &str) -> Result<&'a Value> {
    r.get(column).ok_or_else(|| ChatsqlError::MissingColumn {
        column: column.to_string(),
        available: row::column_names(r).join(", "),
    })
}

/// Shape rows positionally with the default colors.
///
/// `None` for empty rows or an absent/blank chart tag.
pub fn to_visualization(rows: &[Row], chart_type: Option<&str>) -> Option<Visualization> {
    // Positional binding cannot fail
    Transformer::new().transform(rows, chart_type).ok().flatten()
}
