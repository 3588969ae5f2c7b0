//! Runtime configuration for probing and debouncing.

use std::time::Duration;

/// CORS-bypass proxy the registry is reached through by default.
pub const DEFAULT_PROXY_PREFIX: &str = "https://corsmirror.com/v1?url=";

/// Public npm registry (search API).
pub const NPM_REGISTRY_URL: &str = "https://registry.npmjs.com";

/// npm's CouchDB replication endpoint.
pub const NPM_REPLICATE_URL: &str = "https://replicate.npmjs.com";

/// npm's public website, home of organization pages.
pub const NPM_WEBSITE_URL: &str = "https://www.npmjs.com";

/// Per-probe network timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Quiet period before a debounced check fires.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(300);

/// Settings shared by the registry probes and the check controller.
///
/// ```
/// use std::time::Duration;
/// use npm_avail::config::Config;
///
/// let config = Config::default()
///     .without_proxy()
///     .with_debounce(Duration::ZERO);
/// assert!(config.proxy_prefix.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Prefix the percent-encoded target URL is appended to. `None` sends
    /// requests straight to the target.
    pub proxy_prefix: Option<String>,
    /// Base URL of the registry search API.
    pub registry_url: String,
    /// Base URL of the replication database.
    pub replicate_url: String,
    /// Base URL of the website hosting `/org/<name>` pages.
    pub website_url: String,
    /// How long a single probe may take before it is abandoned.
    pub probe_timeout: Duration,
    /// Quiet period for [`CheckController`](crate::controller::CheckController).
    /// Zero starts checks immediately.
    pub debounce: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_prefix: Some(DEFAULT_PROXY_PREFIX.to_owned()),
            registry_url: NPM_REGISTRY_URL.to_owned(),
            replicate_url: NPM_REPLICATE_URL.to_owned(),
            website_url: NPM_WEBSITE_URL.to_owned(),
            probe_timeout: PROBE_TIMEOUT,
            debounce: DEBOUNCE_INTERVAL,
        }
    }
}

impl Config {
    /// Route requests through a different proxy prefix.
    #[must_use]
    pub fn with_proxy(mut self, prefix: impl Into<String>) -> Self {
        self.proxy_prefix = Some(prefix.into());
        self
    }

    /// Send requests directly to their targets.
    #[must_use]
    pub fn without_proxy(mut self) -> Self {
        self.proxy_prefix = None;
        self
    }

    /// Point all three probe targets at one base URL. Used against mock servers.
    #[must_use]
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.registry_url.clone_from(&base);
        self.replicate_url.clone_from(&base);
        self.website_url = base;
        self
    }

    /// Override the per-probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Override the debounce interval.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}
