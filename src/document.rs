//! The VAST document model and the wrapper-chain resolver.
//!
//! A `VastDocument` is either an inline ad or a wrapper whose child document
//! arrives later from another execution context. Accessors merge fields across
//! the chain: single values come from the outermost level that has one, lists
//! accumulate outer-to-inner. Before answering, an accessor waits for every
//! pending wrapper link, bounded by the configured wrapper timeout.

use crate::config::ResolverConfig;
use crate::error::{Result, VastError};
use crate::models::{AdFields, EventType, ResolvedAd, Tracking, SKIP_OFFSET_UNSET};
use crate::parser;
use log::{error, info, warn};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;

/// A parsed VAST document
#[derive(Debug)]
pub enum VastDocument {
    /// A document providing playable media directly
    Inline(AdFields),

    /// A document redirecting to another VAST document
    Wrapper {
        fields: AdFields,
        /// The `VASTAdTagURI` of the wrapped document
        tag_uri: String,
        link: Arc<WrapperLink>,
    },
}

/// What `on_wrapper_found` receives while a wrapper document is parsed
#[derive(Debug, Clone)]
pub struct WrapperRequest {
    /// The `VASTAdTagURI` to fetch
    pub url: String,

    /// Settles the wrapper link once the fetch completes or fails
    pub handle: WrapperHandle,
}

/// Write capability for a wrapper link, usable from any execution context
#[derive(Debug, Clone)]
pub struct WrapperHandle {
    link: Arc<WrapperLink>,
}

impl WrapperHandle {
    /// Attach the fetched child document, waking every waiting accessor
    pub fn attach(&self, child: VastDocument) -> Result<()> {
        self.link.attach(child)
    }

    /// Report that the wrapped document could not be obtained
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.link.fail(reason.into())
    }

    pub fn is_settled(&self) -> bool {
        self.link.outcome.get().is_some()
    }
}

#[derive(Debug)]
enum LinkOutcome {
    Attached(Box<VastDocument>),
    Failed(String),
}

/// The write-once link from a wrapper to its child document
#[derive(Debug)]
pub struct WrapperLink {
    outcome: OnceLock<LinkOutcome>,
    settled: watch::Sender<bool>,
    timeout: Duration,
}

impl WrapperLink {
    fn new(timeout: Duration) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            outcome: OnceLock::new(),
            settled,
            timeout,
        }
    }

    fn attach(self: &Arc<Self>, child: VastDocument) -> Result<()> {
        if child.chain_contains(self) {
            return Err(VastError::WrapperCycle);
        }
        self.settle(LinkOutcome::Attached(Box::new(child)))
    }

    fn fail(&self, reason: String) -> Result<()> {
        warn!("Wrapper resolution failed: {}", reason);
        self.settle(LinkOutcome::Failed(reason))
    }

    fn settle(&self, outcome: LinkOutcome) -> Result<()> {
        self.outcome
            .set(outcome)
            .map_err(|_| VastError::WrapperAlreadyResolved)?;
        self.settled.send_replace(true);
        Ok(())
    }

    /// Wait for the link to settle; a timeout settles it as failed
    async fn wait(&self) -> &LinkOutcome {
        if let Some(outcome) = self.outcome.get() {
            return outcome;
        }

        let mut rx = self.settled.subscribe();
        let _ = tokio::time::timeout(self.timeout, rx.wait_for(|settled| *settled)).await;

        // Whichever outcome landed first stands, including an attach racing the timer
        let outcome = self.outcome.get_or_init(|| {
            warn!(
                "Wrapper not attached within {:?}, continuing without it",
                self.timeout
            );
            LinkOutcome::Failed(format!("wrapper not attached within {:?}", self.timeout))
        });
        self.settled.send_replace(true);
        outcome
    }
}

/// The levels of a resolved chain, outermost first
struct ResolvedChain<'a> {
    levels: Vec<&'a AdFields>,
    degraded: bool,
}

impl VastDocument {
    /// Parse a VAST document with the default resolver settings
    ///
    /// Never fails: a document that cannot be parsed comes back as an empty
    /// inline document, so a missing media file URL signals the failure.
    pub fn parse(xml: &str, on_wrapper_found: impl FnMut(WrapperRequest)) -> Self {
        Self::parse_with_config(xml, &ResolverConfig::default(), on_wrapper_found)
    }

    pub fn parse_with_config(
        xml: &str,
        config: &ResolverConfig,
        mut on_wrapper_found: impl FnMut(WrapperRequest),
    ) -> Self {
        let parsed = match parser::parse_vast(xml) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to parse VAST XML: {}", e);
                return VastDocument::Inline(AdFields::default());
            }
        };

        match parsed.wrapper_uri {
            None => VastDocument::Inline(parsed.fields),
            Some(tag_uri) => {
                info!("Found wrapper: {}", tag_uri);
                let link = Arc::new(WrapperLink::new(config.wrapper_timeout()));
                on_wrapper_found(WrapperRequest {
                    url: tag_uri.clone(),
                    handle: WrapperHandle { link: link.clone() },
                });
                VastDocument::Wrapper {
                    fields: parsed.fields,
                    tag_uri,
                    link,
                }
            }
        }
    }

    /// This level's own fields, ignoring the rest of the chain
    pub fn fields(&self) -> &AdFields {
        match self {
            VastDocument::Inline(fields) => fields,
            VastDocument::Wrapper { fields, .. } => fields,
        }
    }

    pub fn has_wrapper(&self) -> bool {
        matches!(self, VastDocument::Wrapper { .. })
    }

    pub fn wrapper_tag_uri(&self) -> Option<&str> {
        match self {
            VastDocument::Wrapper { tag_uri, .. } => Some(tag_uri),
            VastDocument::Inline(_) => None,
        }
    }

    /// A handle to this document's wrapper link, if it has one
    pub fn wrapper_handle(&self) -> Option<WrapperHandle> {
        match self {
            VastDocument::Wrapper { link, .. } => Some(WrapperHandle { link: link.clone() }),
            VastDocument::Inline(_) => None,
        }
    }

    /// The attached child document, if the link has been settled with one
    pub fn wrapper(&self) -> Option<&VastDocument> {
        match self {
            VastDocument::Wrapper { link, .. } => match link.outcome.get() {
                Some(LinkOutcome::Attached(child)) => Some(child.as_ref()),
                _ => None,
            },
            VastDocument::Inline(_) => None,
        }
    }

    pub fn attach_wrapper(&self, child: VastDocument) -> Result<()> {
        match self {
            VastDocument::Wrapper { link, .. } => link.attach(child),
            VastDocument::Inline(_) => Err(VastError::NoWrapper),
        }
    }

    /// True once every level of the chain is available without waiting
    ///
    /// A link that failed or timed out counts as resolved.
    pub fn is_fully_ready(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                VastDocument::Inline(_) => return true,
                VastDocument::Wrapper { link, .. } => match link.outcome.get() {
                    None => return false,
                    Some(LinkOutcome::Failed(_)) => return true,
                    Some(LinkOutcome::Attached(child)) => current = child.as_ref(),
                },
            }
        }
    }

    fn chain_contains(&self, target: &Arc<WrapperLink>) -> bool {
        let mut current = self;
        loop {
            match current {
                VastDocument::Inline(_) => return false,
                VastDocument::Wrapper { link, .. } => {
                    if Arc::ptr_eq(link, target) {
                        return true;
                    }
                    match link.outcome.get() {
                        Some(LinkOutcome::Attached(child)) => current = child.as_ref(),
                        _ => return false,
                    }
                }
            }
        }
    }

    async fn resolve_chain(&self) -> ResolvedChain<'_> {
        let mut levels = Vec::new();
        let mut degraded = false;
        let mut current = self;
        loop {
            levels.push(current.fields());
            match current {
                VastDocument::Inline(_) => break,
                VastDocument::Wrapper { link, .. } => match link.wait().await {
                    LinkOutcome::Attached(child) => current = child.as_ref(),
                    LinkOutcome::Failed(_) => {
                        degraded = true;
                        break;
                    }
                },
            }
        }
        ResolvedChain { levels, degraded }
    }

    /// Resolve the whole chain and merge every field at once
    pub async fn resolve(&self) -> ResolvedAd {
        let chain = self.resolve_chain().await;
        ResolvedAd {
            media_file_url: chain.first(|f| f.media_file_url.clone()),
            duration_text: chain.first(|f| f.duration_text.clone()),
            skip_offset_percent: chain.skip_offset(),
            click_through_url: chain.first(|f| f.click_through_url.clone()),
            impression_tracker_urls: chain.collect(|f| f.impression_tracker_url.clone()),
            click_tracking_urls: chain.collect(|f| f.click_tracking_url.clone()),
            trackings: chain.trackings().cloned().collect(),
            levels: chain.levels.len(),
            degraded: chain.degraded,
        }
    }

    pub async fn media_file_url(&self) -> Option<String> {
        self.resolve_chain().await.first(|f| f.media_file_url.clone())
    }

    pub async fn duration_text(&self) -> Option<String> {
        self.resolve_chain().await.first(|f| f.duration_text.clone())
    }

    /// Skip offset percentage, or `SKIP_OFFSET_UNSET`
    pub async fn skip_offset(&self) -> i32 {
        self.resolve_chain().await.skip_offset()
    }

    pub async fn click_through_url(&self) -> Option<String> {
        self.resolve_chain().await.first(|f| f.click_through_url.clone())
    }

    pub async fn impression_tracker_urls(&self) -> Vec<String> {
        self.resolve_chain()
            .await
            .collect(|f| f.impression_tracker_url.clone())
    }

    pub async fn click_tracking_urls(&self) -> Vec<String> {
        self.resolve_chain()
            .await
            .collect(|f| f.click_tracking_url.clone())
    }

    pub async fn trackings_by_type(&self, event_type: EventType) -> Vec<String> {
        self.resolve_chain()
            .await
            .trackings()
            .filter(|t| t.event_type == event_type)
            .map(|t| t.url.clone())
            .collect()
    }

    pub async fn all_trackings(&self) -> Vec<Tracking> {
        self.resolve_chain().await.trackings().cloned().collect()
    }
}

impl ResolvedChain<'_> {
    fn first<T>(&self, field: impl Fn(&AdFields) -> Option<T>) -> Option<T> {
        self.levels.iter().find_map(|f| field(f))
    }

    fn collect<T>(&self, field: impl Fn(&AdFields) -> Option<T>) -> Vec<T> {
        self.levels.iter().filter_map(|f| field(f)).collect()
    }

    fn skip_offset(&self) -> i32 {
        self.first(|f| (f.skip_offset_percent != SKIP_OFFSET_UNSET).then_some(f.skip_offset_percent))
            .unwrap_or(SKIP_OFFSET_UNSET)
    }

    fn trackings(&self) -> impl Iterator<Item = &Tracking> + '_ {
        self.levels.iter().flat_map(|f| f.trackings.all())
    }
}
