use futures::future::join_all;
use log::{debug, info};

use corral_lib::RequestOptions;

use super::CommandParams;
use crate::ExitCode;
use crate::report::{Outcome, Report};

/// Issue every request at once and collect the outcomes in input order.
///
/// Coalescing and per-host admission happen inside the dispatcher, so all
/// calls are started right away.
pub(crate) async fn dispatch(params: CommandParams) -> (Report, ExitCode) {
    let CommandParams {
        dispatcher,
        requests,
        cfg,
    } = params;

    info!("Dispatching {} requests", requests.len());
    let calls = requests.into_iter().map(|url| {
        let dispatcher = dispatcher.clone();
        async move {
            let result = dispatcher.request(&url, RequestOptions::default()).await;
            debug!("{url}: {}", if result.is_ok() { "ok" } else { "failed" });
            Outcome { url, result }
        }
    });
    let results = join_all(calls).await;

    let report = Report {
        results,
        stats: dispatcher.stats(),
        host_stats: cfg.host_stats.then(|| dispatcher.host_stats()),
    };

    let exit_code = if report.is_success() {
        ExitCode::Success
    } else {
        ExitCode::RequestFailure
    };
    (report, exit_code)
}
