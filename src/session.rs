//! Playback session state machine.
//!
//! `PlaybackSession` holds no clock and performs no I/O: every transition
//! writes the beacons to fire and the UI events to post into an `Outbox`,
//! which the coordinator drains after each step.

use crate::models::{EventType, ResolvedAd};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Lifecycle of one ad session
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Initializing,
    Running,
    Finished,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Cancelled)
    }
}

/// Video geometry reported by the media layer
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct VideoLayout {
    pub width: u32,
    pub height: u32,
    /// Width over height, or 0 when the height is unknown
    pub aspect_ratio: f64,
}

impl VideoLayout {
    pub fn new(width: u32, height: u32) -> Self {
        let aspect_ratio = if height == 0 {
            0.0
        } else {
            f64::from(width) / f64::from(height)
        };
        Self {
            width,
            height,
            aspect_ratio,
        }
    }
}

/// The media layer's "ready" signal
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct MediaReady {
    /// Video length; falls back to the VAST `Duration` when absent
    pub video_length_ms: Option<u64>,
    pub width: u32,
    pub height: u32,
}

/// Structured events posted to the UI boundary
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MediaResolved { url: String },
    StateChanged { state: SessionState },
    Layout { layout: VideoLayout },
    Progress { percent_played: f64, remaining_ms: u64 },
    QuartileReached { event: EventType },
    CanCloseChanged { can_close: bool },
    MuteChanged { muted: bool },
    ClickThrough { url: String },
    Completed,
    Cancelled,
    Failed { reason: String },
}

/// What a batch of beacons reports
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BeaconKind {
    Tracking(EventType),
    ClickTracking,
}

/// A batch of beacons to fire for one event
#[derive(Debug, PartialEq, Clone)]
pub struct Beacon {
    pub kind: BeaconKind,
    pub urls: Vec<String>,
}

/// Side effects produced by one session step
///
/// Beacons are drained before UI events so tracking never lags the UI.
#[derive(Debug, Default)]
pub struct Outbox {
    pub beacons: Vec<Beacon>,
    pub events: Vec<SessionEvent>,
}

impl Outbox {
    fn fire(&mut self, kind: BeaconKind, urls: &[String]) {
        if !urls.is_empty() {
            self.beacons.push(Beacon {
                kind,
                urls: urls.to_vec(),
            });
        }
    }

    fn post(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty() && self.events.is_empty()
    }
}

/// A point-in-time view of a session, shared with other contexts
#[derive(Debug, Serialize, PartialEq, Clone, Copy)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub percent_played: f64,
    pub can_close: bool,
    pub muted: bool,
    pub paused: bool,
}

const QUARTILES: [EventType; 3] = [
    EventType::FirstQuartile,
    EventType::Midpoint,
    EventType::ThirdQuartile,
];

/// Completion is only reported past this much playback
const COMPLETE_THRESHOLD_PERCENT: f64 = 75.0;

/// Per-ad playback state
#[derive(Debug)]
pub struct PlaybackSession {
    state: SessionState,
    percent_played: f64,
    fired_quartiles: HashSet<EventType>,
    video_length_ms: u64,
    fallback_length_ms: Option<u64>,
    skip_offset_percent: i32,
    can_close: bool,
    muted: bool,
    paused: bool,
    layout: Option<VideoLayout>,
    beacons: HashMap<EventType, Vec<String>>,
    impression_urls: Vec<String>,
    click_through_url: Option<String>,
    click_tracking_urls: Vec<String>,
}

impl PlaybackSession {
    pub fn new(ad: &ResolvedAd, start_muted: bool) -> Self {
        let mut beacons: HashMap<EventType, Vec<String>> = HashMap::new();
        for tracking in &ad.trackings {
            beacons
                .entry(tracking.event_type)
                .or_default()
                .push(tracking.url.clone());
        }

        let mut impression_urls = ad.impression_tracker_urls.clone();
        impression_urls.extend(beacons.remove(&EventType::Impression).unwrap_or_default());

        Self {
            state: SessionState::Initializing,
            percent_played: 0.0,
            fired_quartiles: HashSet::new(),
            video_length_ms: 0,
            fallback_length_ms: ad.duration_ms(),
            skip_offset_percent: ad.skip_offset_percent,
            can_close: ad.skip_offset_percent <= 0,
            muted: start_muted,
            paused: false,
            layout: None,
            beacons,
            impression_urls,
            click_through_url: ad.click_through_url.clone(),
            click_tracking_urls: ad.click_tracking_urls.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn percent_played(&self) -> f64 {
        self.percent_played
    }

    pub fn can_close(&self) -> bool {
        self.can_close
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn video_length_ms(&self) -> u64 {
        self.video_length_ms
    }

    pub fn layout(&self) -> Option<VideoLayout> {
        self.layout
    }

    pub fn has_fired(&self, quartile: EventType) -> bool {
        self.fired_quartiles.contains(&quartile)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            percent_played: self.percent_played,
            can_close: self.can_close,
            muted: self.muted,
            paused: self.paused,
        }
    }

    fn transition(&mut self, state: SessionState, out: &mut Outbox) {
        info!("Ad session {:?} -> {:?}", self.state, state);
        self.state = state;
        out.post(SessionEvent::StateChanged { state });
    }

    fn fire(&self, event: EventType, out: &mut Outbox) {
        if let Some(urls) = self.beacons.get(&event) {
            out.fire(BeaconKind::Tracking(event), urls);
        }
    }

    /// INITIALIZING -> RUNNING once the media layer is ready
    ///
    /// Returns false if the session was not initializing.
    pub fn begin(&mut self, ready: MediaReady, out: &mut Outbox) -> bool {
        if self.state != SessionState::Initializing {
            debug!("Ignoring media ready in state {:?}", self.state);
            return false;
        }

        self.video_length_ms = ready
            .video_length_ms
            .filter(|ms| *ms > 0)
            .or(self.fallback_length_ms)
            .unwrap_or(0);
        let layout = VideoLayout::new(ready.width, ready.height);
        self.layout = Some(layout);

        self.transition(SessionState::Running, out);
        out.post(SessionEvent::Layout { layout });

        out.fire(
            BeaconKind::Tracking(EventType::Impression),
            &self.impression_urls,
        );
        self.fire(EventType::Start, out);
        if self.muted {
            self.fire(EventType::Mute, out);
        }
        if self.can_close {
            out.post(SessionEvent::CanCloseChanged { can_close: true });
        }
        true
    }

    /// Sample the playback position
    pub fn sample_position(&mut self, position_ms: u64, out: &mut Outbox) {
        if self.video_length_ms == 0 {
            debug!("Video length unknown, cannot compute progress");
            return;
        }
        let percent = position_ms as f64 / self.video_length_ms as f64 * 100.0;
        self.record_progress(percent, out);
    }

    /// Record a playback percentage; quartiles and the close latch fire once
    pub fn record_progress(&mut self, percent: f64, out: &mut Outbox) {
        if self.state != SessionState::Running {
            return;
        }
        self.percent_played = percent;

        for quartile in QUARTILES {
            let reached = quartile
                .quartile_threshold()
                .is_some_and(|threshold| percent >= threshold);
            if reached && self.fired_quartiles.insert(quartile) {
                self.fire(quartile, out);
                out.post(SessionEvent::QuartileReached { event: quartile });
            }
        }

        if !self.can_close && percent >= f64::from(self.skip_offset_percent) {
            self.can_close = true;
            out.post(SessionEvent::CanCloseChanged { can_close: true });
        }

        let played_ms = (percent.clamp(0.0, 100.0) / 100.0 * self.video_length_ms as f64) as u64;
        out.post(SessionEvent::Progress {
            percent_played: percent,
            remaining_ms: self.video_length_ms.saturating_sub(played_ms),
        });
    }

    /// RUNNING -> FINISHED on the media layer's completion signal
    pub fn complete(&mut self, out: &mut Outbox) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        if self.percent_played > COMPLETE_THRESHOLD_PERCENT {
            self.fire(EventType::Complete, out);
        } else {
            debug!(
                "Completion at {:.1}% played, not reporting complete",
                self.percent_played
            );
        }
        self.transition(SessionState::Finished, out);
        out.post(SessionEvent::Completed);
        true
    }

    /// RUNNING -> CANCELLED on a user close, once closing is allowed
    pub fn close(&mut self, out: &mut Outbox) -> bool {
        if self.state != SessionState::Running || !self.can_close {
            debug!(
                "Close refused in state {:?} (can_close = {})",
                self.state, self.can_close
            );
            return false;
        }
        self.fire(EventType::FinalReturn, out);
        self.transition(SessionState::Cancelled, out);
        out.post(SessionEvent::Cancelled);
        true
    }

    /// Terminate on a media-layer error; no completion beacon is sent
    pub fn fail(&mut self, reason: impl Into<String>, out: &mut Outbox) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        out.post(SessionEvent::Failed {
            reason: reason.into(),
        });
        self.transition(SessionState::Cancelled, out);
        out.post(SessionEvent::Cancelled);
        true
    }

    /// Host teardown: stop without a close check or beacons
    pub fn shutdown(&mut self, out: &mut Outbox) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(SessionState::Cancelled, out);
        out.post(SessionEvent::Cancelled);
        true
    }

    pub fn toggle_mute(&mut self, out: &mut Outbox) -> bool {
        if self.state.is_terminal() {
            return self.muted;
        }
        self.muted = !self.muted;
        if self.state == SessionState::Running {
            let event = if self.muted {
                EventType::Mute
            } else {
                EventType::Unmute
            };
            self.fire(event, out);
        }
        out.post(SessionEvent::MuteChanged { muted: self.muted });
        self.muted
    }

    pub fn pause(&mut self, out: &mut Outbox) -> bool {
        if self.state != SessionState::Running || self.paused {
            return false;
        }
        self.paused = true;
        self.fire(EventType::Pause, out);
        true
    }

    pub fn resume(&mut self, out: &mut Outbox) -> bool {
        if self.state != SessionState::Running || !self.paused {
            return false;
        }
        self.paused = false;
        self.fire(EventType::Resume, out);
        true
    }

    pub fn orientation_changed(&mut self, out: &mut Outbox) {
        if self.state == SessionState::Running {
            self.fire(EventType::Fullscreen, out);
        }
    }

    /// Report a click on the ad; returns the landing URL to open
    pub fn click_through(&mut self, out: &mut Outbox) -> Option<String> {
        if self.state != SessionState::Running {
            return None;
        }
        let url = self.click_through_url.clone()?;
        out.fire(BeaconKind::ClickTracking, &self.click_tracking_urls);
        out.post(SessionEvent::ClickThrough { url: url.clone() });
        Some(url)
    }
}
