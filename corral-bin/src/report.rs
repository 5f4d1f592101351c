use corral_lib::admission::HostStatsMap;
use corral_lib::{Body, DispatchStats, Result};
use serde::Serialize;
use serde::ser::SerializeStruct;

/// The outcome of a single call, in the order the calls were issued
#[derive(Debug)]
pub(crate) struct Outcome {
    pub(crate) url: String,
    pub(crate) result: Result<Body>,
}

impl Outcome {
    pub(crate) const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for Outcome {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Outcome", 3)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("ok", &self.is_success())?;
        match &self.result {
            Ok(body) => s.serialize_field("body", body.as_ref())?,
            Err(e) => s.serialize_field("error", e)?,
        }
        s.end()
    }
}

/// Everything printed at the end of a run
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) results: Vec<Outcome>,
    pub(crate) stats: DispatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) host_stats: Option<HostStatsMap>,
}

impl Report {
    /// `true` if every call succeeded
    pub(crate) fn is_success(&self) -> bool {
        self.results.iter().all(Outcome::is_success)
    }

    pub(crate) fn failed(&self) -> usize {
        self.results.iter().filter(|outcome| !outcome.is_success()).count()
    }
}
