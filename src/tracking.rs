//! Tracking beacon dispatch.

use crate::error::{Result, VastError};
use crate::unwrap::http_client;
use log::{debug, info, warn};
use rand::{thread_rng, Rng};
use std::time::Duration;
use tokio::runtime::Handle;

/// VAST macro replaced with a random number to defeat caches
pub const CACHEBUSTING_MACRO: &str = "[CACHEBUSTING]";

/// Fires tracking beacons
///
/// Implementations must not block the caller and must not surface errors;
/// failures are logged and otherwise ignored.
pub trait TrackingDispatcher: Send + Sync {
    fn fire_and_forget(&self, urls: &[String]);
}

/// Sends one best-effort GET per beacon on the tokio runtime
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpDispatcher {
    /// Create a dispatcher bound to the current tokio runtime
    pub fn new(timeout: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| VastError::Other(format!("No tokio runtime for beacon dispatch: {}", e)))?;
        let client = http_client(timeout)?;
        Ok(Self { client, runtime })
    }
}

impl TrackingDispatcher for HttpDispatcher {
    fn fire_and_forget(&self, urls: &[String]) {
        for raw in urls {
            let url = match url::Url::parse(&expand_macros(raw)) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping invalid beacon URL {:?}: {}", raw, e);
                    continue;
                }
            };

            let client = self.client.clone();
            self.runtime.spawn(async move {
                match client.get(url.clone()).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Beacon {} -> {}", url, response.status());
                    }
                    Ok(response) => {
                        warn!("Beacon {} answered {}", url, response.status());
                    }
                    Err(e) => warn!("Beacon {} failed: {}", url, e),
                }
            });
        }
    }
}

/// Logs beacons instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl TrackingDispatcher for LoggingDispatcher {
    fn fire_and_forget(&self, urls: &[String]) {
        for url in urls {
            info!("Beacon (dry run): {}", expand_macros(url));
        }
    }
}

/// Substitute the VAST macros this dispatcher understands
pub fn expand_macros(url: &str) -> String {
    if !url.contains(CACHEBUSTING_MACRO) {
        return url.to_string();
    }
    let cachebuster: u32 = thread_rng().gen_range(10_000_000..100_000_000);
    url.replace(CACHEBUSTING_MACRO, &cachebuster.to_string())
}
