use crate::options::{Config, HeaderMapExt};
use anyhow::{Context, Result};
use corral_lib::{Dispatcher, DispatcherBuilder, admission::AdmissionConfig};
use http::HeaderMap;

/// Creates a dispatcher according to the command-line config
pub(crate) fn create(cfg: &Config) -> Result<Dispatcher> {
    let headers = HeaderMap::from_header_pairs(&cfg.header)?;
    let admission = AdmissionConfig::from_options(cfg.host_concurrency);

    DispatcherBuilder::builder()
        .concurrency(admission.concurrency)
        .hosts(cfg.hosts.clone())
        .user_agent(cfg.user_agent.clone())
        .timeout(cfg.timeout)
        .custom_headers(headers)
        .allow_insecure(cfg.insecure)
        .build()
        .dispatcher()
        .context("Failed to create request dispatcher")
}
