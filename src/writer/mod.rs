//! Output writers for visualizations
//!
//! A writer renders a [`Visualization`] into a format a front end can display
//! directly.

use crate::visualization::Visualization;
use crate::Result;

#[cfg(feature = "vegalite")]
pub mod vegalite;

#[cfg(feature = "vegalite")]
pub use vegalite::VegaLiteWriter;

/// Trait for visualization renderers
pub trait Writer {
    /// Rendered form, e.g. a JSON document
    type Output;

    /// Render a visualization
    fn write(&self, viz: &Visualization) -> Result<Self::Output>;

    /// Check that the visualization can be rendered
    fn validate(&self, viz: &Visualization) -> Result<()> {
        viz.validate()
    }
}
