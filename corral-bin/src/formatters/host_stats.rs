use std::fmt::{self, Display};

use corral_lib::admission::HostStatsMap;

use crate::formatters::color::{DIM, NORMAL, color};

/// Per-host statistics as a table, busiest host first
pub(crate) struct CompactHostStats<'a>(pub(crate) &'a HostStatsMap);

impl Display for CompactHostStats<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(f, "Per-host statistics")?;

        let separator = "─".repeat(72);
        color!(f, DIM, "{}", separator)?;
        writeln!(f)?;

        let sorted_hosts = self.0.sorted();
        let host_width = sorted_hosts
            .iter()
            .map(|(host, _)| host.len())
            .max()
            .unwrap_or(0)
            .max(8);

        for (host, stats) in sorted_hosts {
            let median_time = stats
                .median_request_time()
                .map_or_else(|| "N/A".to_string(), |d| format!("{:.0}ms", d.as_millis()));

            color!(
                f,
                NORMAL,
                "{:<width$} │ {:>5} reqs │ {:>5.1}% success │ {:>7} median │ {:>3} peak active │ {:>3} peak buffered",
                host,
                stats.total_requests,
                stats.success_rate() * 100.0,
                median_time,
                stats.peak_active,
                stats.peak_buffered,
                width = host_width
            )?;
            writeln!(f)?;
        }

        Ok(())
    }
}
