use serde::{Deserialize, Serialize};

/// Sentinel for a skip offset that is unset or uses an unsupported form
pub const SKIP_OFFSET_UNSET: i32 = -1;

/// The playback milestones a tracking beacon can be attached to
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    FinalReturn,
    Impression,
    Start,
    #[serde(rename = "FIRSTQ")]
    FirstQuartile,
    #[serde(rename = "MID")]
    Midpoint,
    #[serde(rename = "THIRDQ")]
    ThirdQuartile,
    Complete,
    Mute,
    Unmute,
    Pause,
    Resume,
    Fullscreen,
    Unknown,
}

impl EventType {
    /// Every event type a `Tracking` element can name, excluding `Unknown`
    pub const KNOWN: [EventType; 12] = [
        EventType::FinalReturn,
        EventType::Impression,
        EventType::Start,
        EventType::FirstQuartile,
        EventType::Midpoint,
        EventType::ThirdQuartile,
        EventType::Complete,
        EventType::Mute,
        EventType::Unmute,
        EventType::Pause,
        EventType::Resume,
        EventType::Fullscreen,
    ];

    /// Map the `event` attribute of a `Tracking` element
    pub fn from_attribute(value: &str) -> Self {
        const NAMES: [(&str, EventType); 14] = [
            ("finalReturn", EventType::FinalReturn),
            ("close", EventType::FinalReturn),
            ("closeLinear", EventType::FinalReturn),
            ("impression", EventType::Impression),
            ("start", EventType::Start),
            ("firstQuartile", EventType::FirstQuartile),
            ("midpoint", EventType::Midpoint),
            ("thirdQuartile", EventType::ThirdQuartile),
            ("complete", EventType::Complete),
            ("mute", EventType::Mute),
            ("unmute", EventType::Unmute),
            ("pause", EventType::Pause),
            ("resume", EventType::Resume),
            ("fullscreen", EventType::Fullscreen),
        ];

        let value = value.trim();
        NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, event)| *event)
            .unwrap_or(EventType::Unknown)
    }

    /// The canonical `event` attribute value for this type
    pub fn as_attribute(&self) -> &'static str {
        match self {
            EventType::FinalReturn => "finalReturn",
            EventType::Impression => "impression",
            EventType::Start => "start",
            EventType::FirstQuartile => "firstQuartile",
            EventType::Midpoint => "midpoint",
            EventType::ThirdQuartile => "thirdQuartile",
            EventType::Complete => "complete",
            EventType::Mute => "mute",
            EventType::Unmute => "unmute",
            EventType::Pause => "pause",
            EventType::Resume => "resume",
            EventType::Fullscreen => "fullscreen",
            EventType::Unknown => "unknown",
        }
    }

    /// The playback percentage at which a quartile event fires
    pub fn quartile_threshold(&self) -> Option<f64> {
        match self {
            EventType::FirstQuartile => Some(25.0),
            EventType::Midpoint => Some(50.0),
            EventType::ThirdQuartile => Some(75.0),
            _ => None,
        }
    }
}

/// A single tracking beacon
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Tracking {
    /// The event the beacon reports
    pub event_type: EventType,

    /// The beacon URL
    pub url: String,
}

impl Tracking {
    pub fn new(event_type: EventType, url: impl Into<String>) -> Self {
        Self {
            event_type,
            url: url.into(),
        }
    }
}

/// Ordered event-to-URL collection for one document level
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(transparent)]
pub struct TrackingRegistry {
    trackings: Vec<Tracking>,
}

impl TrackingRegistry {
    pub fn push(&mut self, tracking: Tracking) {
        self.trackings.push(tracking);
    }

    pub fn all(&self) -> &[Tracking] {
        &self.trackings
    }

    /// URLs registered for `event_type`, in document order
    pub fn urls_for(&self, event_type: EventType) -> impl Iterator<Item = &str> + '_ {
        self.trackings
            .iter()
            .filter(move |t| t.event_type == event_type)
            .map(|t| t.url.as_str())
    }

    pub fn len(&self) -> usize {
        self.trackings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackings.is_empty()
    }
}

/// The fields parsed from one level (one VAST document) of a wrapper chain
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AdFields {
    /// The VAST version attribute, when present
    pub version: Option<String>,

    /// The media file URL; the last `MediaFile` parsed wins
    pub media_file_url: Option<String>,

    /// The raw `Duration` text (e.g. "00:00:30")
    pub duration_text: Option<String>,

    /// Skip offset as a percentage, or `SKIP_OFFSET_UNSET`
    pub skip_offset_percent: i32,

    /// The click-through URL
    pub click_through_url: Option<String>,

    /// The click tracking URL
    pub click_tracking_url: Option<String>,

    /// The impression tracking URL
    pub impression_tracker_url: Option<String>,

    /// Tracking events
    pub trackings: TrackingRegistry,
}

impl Default for AdFields {
    fn default() -> Self {
        Self {
            version: None,
            media_file_url: None,
            duration_text: None,
            skip_offset_percent: SKIP_OFFSET_UNSET,
            click_through_url: None,
            click_tracking_url: None,
            impression_tracker_url: None,
            trackings: TrackingRegistry::default(),
        }
    }
}

/// A merged view of an entire wrapper chain
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ResolvedAd {
    pub media_file_url: Option<String>,
    pub duration_text: Option<String>,
    pub skip_offset_percent: i32,
    pub click_through_url: Option<String>,

    /// Impression URLs, outermost document first
    pub impression_tracker_urls: Vec<String>,

    /// Click tracking URLs, outermost document first
    pub click_tracking_urls: Vec<String>,

    /// All trackings, outermost document first
    pub trackings: Vec<Tracking>,

    /// Number of documents in the resolved chain
    pub levels: usize,

    /// Set when some wrapper link failed or timed out
    pub degraded: bool,
}

impl ResolvedAd {
    pub fn trackings_by_type(&self, event_type: EventType) -> Vec<String> {
        self.trackings
            .iter()
            .filter(|t| t.event_type == event_type)
            .map(|t| t.url.clone())
            .collect()
    }

    /// `duration_text` converted to milliseconds, when it is well formed
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_text.as_deref().and_then(parse_duration_ms)
    }
}

/// Parse a VAST `HH:MM:SS` or `HH:MM:SS.mmm` duration into milliseconds
pub fn parse_duration_ms(text: &str) -> Option<u64> {
    let mut parts = text.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }

    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    let whole: u64 = whole.parse().ok()?;
    if whole >= 60 {
        return None;
    }
    let millis: u64 = if fraction.is_empty() {
        0
    } else {
        // Only the first three digits are significant
        let digits: String = fraction.chars().chain("000".chars()).take(3).collect();
        digits.parse().ok()?
    };

    Some(((hours * 60 + minutes) * 60 + whole) * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_case_insensitive() {
        assert_eq!(EventType::from_attribute("FirstQuartile"), EventType::FirstQuartile);
        assert_eq!(EventType::from_attribute(" midpoint "), EventType::Midpoint);
        assert_eq!(EventType::from_attribute("closeLinear"), EventType::FinalReturn);
        assert_eq!(EventType::from_attribute("creativeView"), EventType::Unknown);
    }

    #[test]
    fn known_events_round_trip_through_their_attribute() {
        for event in EventType::KNOWN {
            assert_eq!(EventType::from_attribute(event.as_attribute()), event);
        }
    }

    #[test]
    fn registry_filters_by_type_in_order() {
        let mut registry = TrackingRegistry::default();
        registry.push(Tracking::new(EventType::Start, "http://a"));
        registry.push(Tracking::new(EventType::Mute, "http://b"));
        registry.push(Tracking::new(EventType::Start, "http://c"));

        let starts: Vec<&str> = registry.urls_for(EventType::Start).collect();
        assert_eq!(starts, vec!["http://a", "http://c"]);
        assert_eq!(registry.urls_for(EventType::Pause).count(), 0);
    }

    #[test]
    fn durations_parse_with_and_without_millis() {
        assert_eq!(parse_duration_ms("00:00:30"), Some(30_000));
        assert_eq!(parse_duration_ms("01:02:03.5"), Some(3_723_500));
        assert_eq!(parse_duration_ms("00:00:15.250"), Some(15_250));
        assert_eq!(parse_duration_ms("00:75:00"), None);
        assert_eq!(parse_duration_ms("30"), None);
        assert_eq!(parse_duration_ms(""), None);
    }
}
