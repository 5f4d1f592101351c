use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow};
use clap::builder::PossibleValuesParser;
use clap::{Parser, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use corral_lib::DEFAULT_USER_AGENT;
use corral_lib::admission::{DEFAULT_CONCURRENCY, HostConfigs};
use http::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use strum::{Display, EnumIter, EnumString, VariantNames};

pub(crate) const CORRAL_CONFIG_FILE: &str = "corral.toml";

const DEFAULT_REPEAT: usize = 1;

const REPEAT_STR: &str = concatcp!(DEFAULT_REPEAT);
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    CORRAL_CONFIG_FILE,
);
const HELP_MSG_HOST_CONCURRENCY: &str = formatcp!(
    "Maximum number of concurrent requests per host\n\n[default: {}]",
    DEFAULT_CONCURRENCY,
);

/// The format used to print the outcome of every request
#[derive(
    Debug,
    Deserialize,
    Default,
    Clone,
    Copy,
    Display,
    EnumIter,
    EnumString,
    VariantNames,
    PartialEq,
)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputFormat {
    /// One line per request
    #[default]
    Compact,
    /// A single JSON document
    Json,
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    repeat: usize = DEFAULT_REPEAT;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// If the header contains multiple colons, the part after the first colon is
/// considered the value.
///
/// # Errors
///
/// This fails if the header does not contain a `:` character or
/// if the header name contains non-ASCII characters.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parses a single HTTP header into a tuple of (String, String)
///
/// This does NOT merge multiple headers into one.
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let header_str = value.to_str().ok_or_else(|| {
            clap::Error::raw(
                clap::error::ErrorKind::InvalidValue,
                "Header value contains invalid UTF-8",
            )
        })?;

        match parse_single_header(header_str) {
            Ok((name, value)) => {
                let Ok(value) = value.to_str() else {
                    return Err(clap::Error::raw(
                        clap::error::ErrorKind::InvalidValue,
                        "Header value contains invalid UTF-8",
                    ));
                };

                Ok((name.to_string(), value.to_string()))
            }
            Err(e) => Err(clap::Error::raw(
                clap::error::ErrorKind::InvalidValue,
                e.to_string(),
            )),
        }
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// Extension trait for converting a Vec of header pairs to a `HeaderMap`
pub(crate) trait HeaderMapExt {
    /// Convert a collection of header key-value pairs to a `HeaderMap`
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error>;
}

impl HeaderMapExt for HeaderMap {
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid value for header '{name}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}

/// Parse a count which must be at least one
fn parse_positive(value: &str) -> Result<usize> {
    match value.parse::<usize>()? {
        0 => Err(anyhow!("must be at least 1")),
        n => Ok(n),
    }
}

/// corral sends HTTP GET requests and prints the decoded JSON responses.
///
/// Identical requests which are in flight at the same time are sent only
/// once and share the response. No host receives more than a fixed number
/// of concurrent requests; the rest wait in line.
///
/// corral is powered by corral-lib.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct CorralOptions {
    /// URLs to request
    #[arg(name = "urls", required = true)]
    pub(crate) urls: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl CorralOptions {
    /// Every URL in the order it is sent, each one `repeat` times
    pub(crate) fn requests(&self) -> Vec<String> {
        self.urls
            .iter()
            .flat_map(|url| std::iter::repeat_n(url.clone(), self.config.repeat))
            .collect()
    }
}

// Custom deserializer function for the header field
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// The main configuration for corral
#[derive(Parser, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Set custom header for requests
    #[arg(
        short = 'H',
        long,
        action = clap::ArgAction::Append,
        value_parser = HeaderParser,
        value_name = "HEADER:VALUE",
        long_help = "Set custom header for requests

Specify custom headers in the format 'Name: Value'. For example, 'Accept: application/json'.
Multiple headers can be specified by using the flag multiple times.
The specified headers are used for ALL requests.
Use the `hosts` option of the configuration file to configure headers on a per-host basis."
    )]
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Default maximum concurrent requests per host
    ///
    /// Requests beyond this limit wait in line and are sent in the order
    /// they were issued. Use the `hosts` option of the configuration file to
    /// configure this on a per-host basis.
    ///
    /// Examples:
    ///   --host-concurrency 1   # One request at a time
    ///   --host-concurrency 10  # Aggressive for fast APIs
    #[arg(
        long,
        value_parser = parse_positive,
        help = HELP_MSG_HOST_CONCURRENCY,
        verbatim_doc_comment
    )]
    #[serde(default)]
    pub(crate) host_concurrency: Option<usize>,

    /// Timeout per request, from connect to response finished (e.g. `10s`, `500ms`)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    #[serde(default, with = "humantime_serde")]
    pub(crate) timeout: Option<Duration>,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Proceed for server connections considered insecure (invalid TLS)
    #[arg(short, long)]
    #[serde(default)]
    pub(crate) insecure: bool,

    /// Send every URL this many times at once
    ///
    /// Useful to observe request coalescing: repeated URLs share one request.
    #[arg(long, value_parser = parse_positive, default_value = &REPEAT_STR)]
    #[serde(default = "repeat")]
    pub(crate) repeat: usize,

    /// Output format of the responses
    #[arg(short, long, default_value = "compact", value_parser = PossibleValuesParser::new(OutputFormat::VARIANTS).map(|s| s.parse::<OutputFormat>().unwrap_or_default()))]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Show per-host statistics at the end of the run
    #[arg(long)]
    #[serde(default)]
    pub(crate) host_stats: bool,

    #[arg(skip)]
    #[serde(default)]
    pub(crate) hosts: HostConfigs,
}

impl Config {
    /// Add the headers of `other` which are not set on the command line
    fn merge_headers(&mut self, other: &[(String, String)]) {
        // Header names are case-insensitive
        let normalize = |(name, value): &(String, String)| (name.to_lowercase(), value.clone());
        let cli_map = self.header.iter().map(normalize).collect::<HashMap<_, _>>();
        let other_map = other.iter().map(normalize).collect::<HashMap<_, _>>();

        // Merge the two maps, with the command line taking precedence
        let merged_map: HashMap<_, _> = other_map.into_iter().chain(cli_map).collect();

        // Convert the merged map back to a Vec of tuples
        self.header = merged_map.into_iter().collect();
    }

    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        // Read configuration file
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    pub(crate) fn merge(&mut self, toml: Config) {
        // Special handling for headers before fold_in!
        self.merge_headers(&toml.header);

        // Hosts configuration is only available in TOML
        self.hosts = toml.hosts;

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,
                ..hosts,

                // Keys with defaults to assign
                format: OutputFormat::default(),
                host_concurrency: None,
                host_stats: false,
                insecure: false,
                repeat: DEFAULT_REPEAT,
                timeout: None,
                user_agent: DEFAULT_USER_AGENT,
                verbose: Verbosity::default(),
            }
        }
    }
}
