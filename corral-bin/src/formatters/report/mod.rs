mod compact;
mod json;

pub(crate) use compact::Compact;
pub(crate) use json::Json;

use anyhow::Result;

use crate::report::Report;

/// A `ReportFormatter` turns the outcome of a run into printable output
pub(crate) trait ReportFormatter {
    /// Format the report as a string
    fn format(&self, report: &Report) -> Result<String>;
}
