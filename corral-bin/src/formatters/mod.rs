pub(crate) mod color;
pub(crate) mod host_stats;
pub(crate) mod log;
pub(crate) mod report;

use self::report::ReportFormatter;
use crate::options::OutputFormat;

pub(crate) fn get_report_formatter(format: OutputFormat) -> Box<dyn ReportFormatter> {
    match format {
        OutputFormat::Compact => Box::new(report::Compact::new()),
        OutputFormat::Json => Box::new(report::Json::new()),
    }
}
