//! Settings shared by everything talking to the upstream.

use std::{fmt, num::NonZeroUsize, time::Duration};

use reqwest::Url;

/// Basic-Auth credentials sent with every outbound request.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the index document. Its scheme and authority are reused for every listed calendar.
    pub target: Url,
    pub credentials: Credentials,
    /// Upper bound of simultaneous calendar fetches, `None` fetches everything at once.
    pub max_concurrent_fetches: Option<NonZeroUsize>,
    /// Timeout of a single outbound request.
    pub fetch_timeout: Option<Duration>,
}

impl Config {
    pub fn new(target: Url, credentials: Credentials) -> Self {
        Self {
            target,
            credentials,
            max_concurrent_fetches: None,
            fetch_timeout: None,
        }
    }
}

/// `url` without user and password, safe to log.
///
/// Credentials are only ever taken from [`Credentials`].
pub fn without_userinfo(url: &Url) -> Url {
    let mut url = url.clone();
    // Both only fail for URLs which cannot carry userinfo in the first place.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url
}

/// Command line arguments selecting the upstream, shared by the binaries.
#[cfg(feature = "args")]
#[derive(Debug, Clone, clap::Args)]
pub struct UpstreamArgs {
    /// url of the index document listing the calendars
    #[arg(long, env = "TARGET")]
    pub target: Url,
    /// user for basic auth
    #[arg(long, env = "AUTH_USER", default_value = "")]
    pub user: String,
    /// password for basic auth
    #[arg(long, env = "AUTH_PASS", default_value = "", hide_env_values = true)]
    pub pass: String,
    /// maximum number of calendars fetched at once, unlimited if not given
    #[arg(long, env = "MAX_CONCURRENT_FETCHES")]
    pub max_concurrent_fetches: Option<NonZeroUsize>,
    /// timeout of a single upstream request in seconds
    #[arg(long, env = "FETCH_TIMEOUT")]
    pub fetch_timeout: Option<u64>,
}

#[cfg(feature = "args")]
impl From<&UpstreamArgs> for Config {
    fn from(value: &UpstreamArgs) -> Self {
        Self {
            target: value.target.clone(),
            credentials: Credentials::new(&value.user, &value.pass),
            max_concurrent_fetches: value.max_concurrent_fetches,
            fetch_timeout: value.fetch_timeout.map(Duration::from_secs),
        }
    }
}
