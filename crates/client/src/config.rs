use std::time::Duration;

/// Default base URL of the store API.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every endpoint is relative to, without a trailing slash.
    pub api_url: String,
    /// Delay between two polls of the same node (default: 2000 ms).
    pub poll_interval: Duration,
    /// Per-request HTTP timeout (default: 30 s).
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                      |
    /// |------------------------|------------------------------|
    /// | `STUDIO_API_URL`       | `http://127.0.0.1:8000/api`  |
    /// | `POLL_INTERVAL_MS`     | `2000`                       |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                         |
    pub fn from_env() -> Self {
        let api_url = std::env::var("STUDIO_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());

        let poll_interval_ms: u64 = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .expect("POLL_INTERVAL_MS must be a valid u64");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    /// Configuration pointing at `api_url` with default timings.
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}
