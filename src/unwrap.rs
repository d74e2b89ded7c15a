use crate::config::ResolverConfig;
use crate::document::{VastDocument, WrapperRequest};
use crate::error::{Result, VastError};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fetches wrapped VAST documents and attaches them to their wrappers
///
/// `load` parses the root document synchronously and hands every
/// `VASTAdTagURI` it finds to a background task, so the returned document
/// becomes fully resolvable as fetches complete. A link whose fetch fails,
/// or that lies deeper than `max_wrapper_depth`, is settled as failed.
#[derive(Debug)]
pub struct WrapperLoader {
    client: reqwest::Client,
    config: ResolverConfig,
}

impl WrapperLoader {
    pub fn new(config: ResolverConfig) -> Result<Arc<Self>> {
        let client = http_client(config.fetch_timeout())?;
        Ok(Arc::new(Self { client, config }))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Parse `xml` and start resolving its wrapper chain in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn load(self: &Arc<Self>, xml: &str) -> VastDocument {
        self.load_at_depth(xml, 0)
    }

    fn load_at_depth(self: &Arc<Self>, xml: &str, depth: usize) -> VastDocument {
        let mut requests = Vec::new();
        let doc = VastDocument::parse_with_config(xml, &self.config, |r| requests.push(r));
        for request in requests {
            self.spawn_fetch(request, depth + 1);
        }
        doc
    }

    fn spawn_fetch(self: &Arc<Self>, request: WrapperRequest, depth: usize) {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = if depth > loader.config.max_wrapper_depth {
                Err(VastError::WrapperDepthExceeded(loader.config.max_wrapper_depth))
            } else {
                loader.fetch(&request.url).await
            };

            let settled = match outcome {
                Ok(xml) => {
                    let child = loader.load_at_depth(&xml, depth);
                    request.handle.attach(child)
                }
                Err(e) => request.handle.fail(e.to_string()),
            };
            if let Err(e) = settled {
                warn!("Could not settle wrapper {}: {}", request.url, e);
            }
        });
    }

    async fn fetch(&self, url_or_path: &str) -> Result<String> {
        match local_path(url_or_path) {
            Some(path) => {
                debug!("Reading wrapped VAST from file: {}", path.display());
                Ok(tokio::fs::read_to_string(path).await?)
            }
            None => fetch_vast_from_url(&self.client, url_or_path).await,
        }
    }
}

/// Fetch VAST content from a URL or file path
pub async fn fetch_vast_content(url_or_path: &str, config: &ResolverConfig) -> Result<String> {
    if let Some(path) = local_path(url_or_path) {
        info!("Reading from file: {}", path.display());
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    let client = http_client(config.fetch_timeout())?;
    fetch_vast_from_url(&client, url_or_path).await
}

/// Build the HTTP client shared by wrapper fetches and beacons
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))
}

/// Resolve `file://` URLs and plain paths that exist on disk
fn local_path(url_or_path: &str) -> Option<PathBuf> {
    if let Some(path) = url_or_path.strip_prefix("file://") {
        #[cfg(target_os = "windows")]
        let path = path.trim_start_matches('/');
        return Some(PathBuf::from(path));
    }

    let path = Path::new(url_or_path);
    path.exists().then(|| path.to_path_buf())
}

/// Fetch VAST XML from a URL
async fn fetch_vast_from_url(client: &reqwest::Client, url: &str) -> Result<String> {
    // Generate a random request ID for tracking in logs
    let req_id: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    let url = url::Url::parse(url)?;
    info!("[{}] Fetching from URL: {}", req_id, url);

    let start_time = Instant::now();
    let response = client.get(url).send().await.map_err(|e| {
        warn!("[{}] Request failed after {:?}", req_id, start_time.elapsed());
        VastError::FetchError(e.to_string())
    })?;

    debug!("[{}] Received response in {:?}", req_id, start_time.elapsed());

    if !response.status().is_success() {
        return Err(VastError::FetchError(format!(
            "HTTP status {}",
            response.status()
        )));
    }

    let xml_content = response
        .text()
        .await
        .map_err(|e| VastError::FetchError(format!("Failed to read response body: {}", e)))?;

    debug!("[{}] Total request completed in {:?}", req_id, start_time.elapsed());

    Ok(xml_content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_and_existing_paths_are_local() {
        assert_eq!(
            local_path("file:///tmp/ad.xml"),
            Some(PathBuf::from("/tmp/ad.xml"))
        );
        assert_eq!(local_path("http://example.com/ad.xml"), None);
        assert_eq!(local_path("/definitely/not/here.xml"), None);
    }

    #[test]
    fn http_client_builds_for_any_timeout() {
        assert!(http_client(Duration::from_millis(1)).is_ok());
        assert!(http_client(ResolverConfig::default().fetch_timeout()).is_ok());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_fetching() {
        let err = fetch_vast_content("not a url", &ResolverConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VastError::UrlError(_)));
    }
}
