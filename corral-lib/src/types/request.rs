use http::HeaderMap;

/// Per-call options of a request.
///
/// The method is always `GET` and there is no body; only headers can be
/// customized. Note that options do not take part in deduplication: two calls
/// to the same URL with different options share a single network call and the
/// options of the first caller win.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Extra headers sent with the request
    pub headers: HeaderMap,
}

impl RequestOptions {
    /// Options carrying the given headers
    #[must_use]
    pub const fn with_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Add `defaults` for every header which is not set explicitly.
    ///
    /// Headers already present in `self` take precedence.
    pub(crate) fn merge_defaults(&mut self, defaults: &HeaderMap) {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
    }
}

impl From<HeaderMap> for RequestOptions {
    fn from(headers: HeaderMap) -> Self {
        Self::with_headers(headers)
    }
}
