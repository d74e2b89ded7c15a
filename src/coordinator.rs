//! Playback event coordinator.
//!
//! One coordinator task runs per ad session. It resolves the wrapper chain,
//! hands the media URL to the media layer, then samples the playback position
//! on a fixed cadence while reacting to media signals and user commands. The
//! session is owned by the task alone; other contexts talk to it through a
//! `SessionHandle` (commands in, a snapshot `watch` out) and receive UI events
//! from an unbounded channel.

use crate::config::PlayerConfig;
use crate::document::VastDocument;
use crate::error::{Result, VastError};
use crate::session::{MediaReady, Outbox, PlaybackSession, SessionEvent, SessionSnapshot, SessionState};
use crate::tracking::TrackingDispatcher;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// The media layer driven by a session
pub trait MediaPlayer: Send + 'static {
    /// Hand over the resolved media URL; the layer answers with `media_ready`
    fn prepare(&mut self, url: &str);
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn current_position_ms(&self) -> u64;
    fn stop(&mut self);
}

#[derive(Debug)]
enum Command {
    MediaReady(MediaReady),
    MediaCompleted,
    MediaError(String),
    Close,
    Shutdown,
    ToggleMute,
    Pause,
    Resume,
    OrientationChanged,
    ClickThrough,
}

/// Cross-context handle to a running session
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<SessionState>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| VastError::SessionClosed)
    }

    pub fn media_ready(&self, ready: MediaReady) -> Result<()> {
        self.send(Command::MediaReady(ready))
    }

    pub fn media_completed(&self) -> Result<()> {
        self.send(Command::MediaCompleted)
    }

    pub fn media_error(&self, reason: impl Into<String>) -> Result<()> {
        self.send(Command::MediaError(reason.into()))
    }

    /// Ask to close the ad; refused until the skip offset has been reached
    pub fn request_close(&self) -> Result<bool> {
        let snapshot = *self.snapshot.borrow();
        if snapshot.state != SessionState::Running || !snapshot.can_close {
            return Ok(false);
        }
        self.send(Command::Close)?;
        Ok(true)
    }

    /// Stop the session regardless of the close latch
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn orientation_changed(&self) -> Result<()> {
        self.send(Command::OrientationChanged)
    }

    pub fn click_through(&self) -> Result<()> {
        self.send(Command::ClickThrough)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    pub fn can_close(&self) -> bool {
        self.snapshot.borrow().can_close
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait for the session to reach a terminal state
    pub async fn join(self) -> Result<SessionState> {
        self.task
            .await
            .map_err(|e| VastError::Other(format!("Session task failed: {}", e)))
    }
}

/// Start a session for `document` on the current tokio runtime
///
/// Returns the handle and the stream of UI events. The stream ends when the
/// session reaches a terminal state.
pub fn start_session<P: MediaPlayer>(
    document: Arc<VastDocument>,
    player: P,
    dispatcher: Arc<dyn TrackingDispatcher>,
    config: PlayerConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
        state: SessionState::Initializing,
        percent_played: 0.0,
        can_close: false,
        muted: config.start_muted,
        paused: false,
    });

    let task = tokio::spawn(run(
        document,
        player,
        dispatcher,
        config,
        command_rx,
        event_tx,
        snapshot_tx,
    ));

    let handle = SessionHandle {
        commands: command_tx,
        snapshot: snapshot_rx,
        task,
    };
    (handle, event_rx)
}

struct Coordinator<P> {
    session: PlaybackSession,
    player: P,
    dispatcher: Arc<dyn TrackingDispatcher>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<P: MediaPlayer> Coordinator<P> {
    /// Run one session step and flush its effects: beacons, snapshot, then UI events
    fn step<T>(&mut self, f: impl FnOnce(&mut PlaybackSession, &mut Outbox) -> T) -> T {
        let mut out = Outbox::default();
        let result = f(&mut self.session, &mut out);
        self.flush(out);
        result
    }

    fn flush(&mut self, out: Outbox) {
        for beacon in &out.beacons {
            debug!("Firing {:?} ({} urls)", beacon.kind, beacon.urls.len());
            self.dispatcher.fire_and_forget(&beacon.urls);
        }
        self.snapshot.send_replace(self.session.snapshot());
        for event in out.events {
            // The UI may have gone away; the session carries on regardless
            let _ = self.events.send(event);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::MediaReady(ready) => {
                if self.step(|s, out| s.begin(ready, out)) {
                    self.player.set_muted(self.session.is_muted());
                    self.player.play();
                }
            }
            Command::MediaCompleted => {
                self.step(|s, out| s.complete(out));
            }
            Command::MediaError(reason) => {
                warn!("Media layer error: {}", reason);
                self.step(|s, out| s.fail(reason, out));
            }
            Command::Close => {
                self.step(|s, out| s.close(out));
            }
            Command::Shutdown => {
                self.step(|s, out| s.shutdown(out));
            }
            Command::ToggleMute => {
                let muted = self.step(|s, out| s.toggle_mute(out));
                self.player.set_muted(muted);
            }
            Command::Pause => {
                if self.step(|s, out| s.pause(out)) {
                    self.player.pause();
                }
            }
            Command::Resume => {
                if self.step(|s, out| s.resume(out)) {
                    self.player.resume();
                }
            }
            Command::OrientationChanged => {
                self.step(|s, out| s.orientation_changed(out));
            }
            Command::ClickThrough => {
                self.step(|s, out| s.click_through(out));
            }
        }
    }

    fn is_polling(&self) -> bool {
        self.session.state() == SessionState::Running && !self.session.is_paused()
    }
}

async fn run<P: MediaPlayer>(
    document: Arc<VastDocument>,
    player: P,
    dispatcher: Arc<dyn TrackingDispatcher>,
    config: PlayerConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
) -> SessionState {
    // Waits out any pending wrapper, bounded by the resolver timeout. Commands
    // other than shutdown are held until the media has been handed over.
    let mut queued = Vec::new();
    let resolution = document.resolve();
    tokio::pin!(resolution);
    let ad = loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => {
                    debug!("Session shut down while resolving the wrapper chain");
                    return cancel_unresolved(&events, &snapshot);
                }
                Some(command) => queued.push(command),
            },
            ad = &mut resolution => break ad,
        }
    };
    if ad.degraded {
        warn!("Wrapper chain only partially resolved ({} levels)", ad.levels);
    }

    let mut coordinator = Coordinator {
        session: PlaybackSession::new(&ad, config.start_muted),
        player,
        dispatcher,
        events,
        snapshot,
    };

    let Some(media_url) = ad.media_file_url else {
        coordinator.step(|s, out| s.fail("no media file in VAST response", out));
        return coordinator.session.state();
    };

    coordinator.player.prepare(&media_url);
    let _ = coordinator
        .events
        .send(SessionEvent::MediaResolved { url: media_url });

    for command in queued {
        coordinator.handle(command);
    }

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !coordinator.session.state().is_terminal() {
        let polling = coordinator.is_polling();
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => coordinator.handle(command),
                None => {
                    debug!("Session handle dropped, shutting down");
                    coordinator.handle(Command::Shutdown);
                }
            },
            _ = ticker.tick(), if polling => {
                let position_ms = coordinator.player.current_position_ms();
                coordinator.step(|s, out| s.sample_position(position_ms, out));
            }
        }
    }

    coordinator.player.stop();
    coordinator.session.state()
}

/// Cancel a session that never got as far as the media layer
fn cancel_unresolved(
    events: &mpsc::UnboundedSender<SessionEvent>,
    snapshot: &watch::Sender<SessionSnapshot>,
) -> SessionState {
    let state = SessionState::Cancelled;
    snapshot.send_modify(|s| s.state = state);
    let _ = events.send(SessionEvent::StateChanged { state });
    let _ = events.send(SessionEvent::Cancelled);
    state
}
