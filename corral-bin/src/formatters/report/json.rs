use anyhow::{Context, Result};

use super::ReportFormatter;
use crate::report::Report;

/// The whole report as a single JSON document
pub(crate) struct Json;

impl Json {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl ReportFormatter for Json {
    fn format(&self, report: &Report) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format report as JSON")
    }
}
