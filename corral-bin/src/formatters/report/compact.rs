use anyhow::Result;
use std::fmt::{self, Display, Write};

use super::ReportFormatter;
use crate::formatters::color::{BOLD_PINK, DIM, GREEN, NORMAL, color};
use crate::formatters::host_stats::CompactHostStats;
use crate::report::{Outcome, Report};

struct CompactOutcome<'a>(&'a Outcome);

impl Display for CompactOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.0;
        match &outcome.result {
            Ok(body) => {
                color!(f, GREEN, "[OK]",)?;
                write!(f, " {} ", outcome.url)?;
                color!(f, DIM, "{}", body)
            }
            Err(e) => {
                color!(f, BOLD_PINK, "[ERR]",)?;
                write!(f, " {}: {e}", outcome.url)
            }
        }
    }
}

/// One line per call, followed by a summary
pub(crate) struct Compact;

impl Compact {
    pub(crate) const fn new() -> Self {
        Self
    }
}

impl ReportFormatter for Compact {
    fn format(&self, report: &Report) -> Result<String> {
        let mut output = String::new();
        for outcome in &report.results {
            writeln!(output, "{}", CompactOutcome(outcome))?;
        }

        let stats = &report.stats;
        let failed = report.failed();
        writeln!(output)?;
        let f = &mut output;
        color!(
            f,
            NORMAL,
            "{} calls, {} succeeded, {} failed ({} network requests, {} coalesced)",
            report.results.len(),
            report.results.len() - failed,
            failed,
            stats.transport_calls,
            stats.coalesced
        )?;
        writeln!(output)?;

        if let Some(host_stats) = &report.host_stats {
            write!(output, "{}", CompactHostStats(host_stats))?;
        }

        Ok(output)
    }
}
