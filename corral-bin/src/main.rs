//! `corral` issues HTTP requests with two guarantees on top of a plain
//! client: identical requests which are in flight at the same time are sent
//! only once, and no host receives more than a fixed number of concurrent
//! requests.
//!
//! The corral binary is a wrapper around corral-lib, which provides
//! convenience functions for calling corral from the command-line.
//!
//! Request a single JSON document:
//! ```sh
//! corral https://api.github.com/repos/rust-lang/rust
//! ```
//!
//! Request the same document three times; only one request is sent:
//! ```sh
//! corral --repeat 3 https://api.github.com/repos/rust-lang/rust
//! ```
//!
//! Allow at most one request per host at a time and show per-host statistics:
//! ```sh
//! corral --host-concurrency 1 --host-stats https://example.com/a.json https://example.com/b.json
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Error, Result, bail};
use clap::Parser;
use formatters::log::init_logging;
use log::error;

mod client;
mod commands;
mod formatters;
mod options;
mod report;
mod verbosity;

use crate::commands::CommandParams;
use crate::formatters::get_report_formatter;
use crate::options::{CORRAL_CONFIG_FILE, Config, CorralOptions};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    // See: https://doc.rust-lang.org/stable/std/process/fn.exit.html
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<CorralOptions> {
    let mut opts = CorralOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, fall back to `corral.toml` in the
        // current directory. An invalid default file is an error as well.
        let default_config = PathBuf::from(CORRAL_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call corral entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run corral on the given URLs
async fn run(opts: &CorralOptions) -> Result<i32> {
    let dispatcher = client::create(&opts.config)?;
    let params = CommandParams {
        dispatcher,
        requests: opts.requests(),
        cfg: opts.config.clone(),
    };

    let (report, exit_code) = commands::dispatch(params).await;

    let formatter = get_report_formatter(opts.config.format);
    let output = formatter.format(&report)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        writeln!(stdout)?;
    }
    stdout.flush()?;

    Ok(exit_code as i32)
}
