use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::ErrorKind;
use crate::types::Result;

/// A type-safe representation of the authority a request is sent to.
///
/// Two URLs map to the same key when they share scheme, host and port.
/// Ports are made explicit for schemes with a known default, so
/// `http://example.com/` and `http://example.com:80/` end up in the same
/// admission queue, while `https://example.com/` does not.
///
/// # Examples
///
/// ```
/// use corral_lib::admission::HostKey;
/// use url::Url;
///
/// let url = Url::parse("https://API.github.com/repos/user/repo").unwrap();
/// let host_key = HostKey::try_from(&url).unwrap();
/// assert_eq!(host_key.as_str(), "https://api.github.com:443");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct HostKey(String);

impl HostKey {
    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&Url> for HostKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ErrorKind::InvalidUrlHost {
                url: url.to_string(),
            })?;

        // `Url` already lowercases domains of special schemes;
        // do it for the others as well
        let host = host.to_lowercase();
        let key = match url.port_or_known_default() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        Ok(HostKey(key))
    }
}

impl TryFrom<Url> for HostKey {
    type Error = ErrorKind;

    fn try_from(url: Url) -> Result<Self> {
        HostKey::try_from(&url)
    }
}

impl FromStr for HostKey {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|source| ErrorKind::InvalidUrl {
            url: s.to_string(),
            source,
        })?;
        HostKey::try_from(&url)
    }
}

impl TryFrom<String> for HostKey {
    type Error = ErrorKind;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
