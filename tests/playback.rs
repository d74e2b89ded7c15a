use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use vast_interstitial::{
    start_session, EventType, MediaPlayer, MediaReady, PlayerConfig, SessionEvent, SessionState,
    TrackingDispatcher, VastDocument,
};

/// Records every beacon URL instead of sending it
#[derive(Default)]
struct RecordingDispatcher {
    fired: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    fn count(&self, url: &str) -> usize {
        self.fired.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl TrackingDispatcher for RecordingDispatcher {
    fn fire_and_forget(&self, urls: &[String]) {
        self.fired.lock().unwrap().extend(urls.iter().cloned());
    }
}

/// A media layer whose position is set by the test
#[derive(Default)]
struct ScriptedPlayer {
    position_ms: Arc<AtomicU64>,
    muted: Arc<Mutex<Vec<bool>>>,
    prepared: Arc<Mutex<Vec<String>>>,
}

impl MediaPlayer for ScriptedPlayer {
    fn prepare(&mut self, url: &str) {
        self.prepared.lock().unwrap().push(url.to_string());
    }
    fn play(&mut self) {}
    fn pause(&mut self) {}
    fn resume(&mut self) {}

    fn set_muted(&mut self, muted: bool) {
        self.muted.lock().unwrap().push(muted);
    }

    fn current_position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {}
}

fn vast(skip_offset: &str) -> String {
    let trackings: String = EventType::KNOWN
        .iter()
        .map(|e| {
            format!(
                r#"<Tracking event="{}">http://t.example/{}</Tracking>"#,
                e.as_attribute(),
                e.as_attribute()
            )
        })
        .collect();
    format!(
        r#"<VAST version="2.0"><Ad><InLine>
  <Impression>http://t.example/imp</Impression>
  <Creatives><Creative><Linear skipoffset="{skip_offset}">
    <Duration>00:00:10</Duration>
    <TrackingEvents>{trackings}</TrackingEvents>
    <MediaFiles><MediaFile>http://m.example/video.mp4</MediaFile></MediaFiles>
  </Linear></Creative></Creatives>
</InLine></Ad></VAST>"#
    )
}

fn url(event: EventType) -> String {
    format!("http://t.example/{}", event.as_attribute())
}

struct Harness {
    dispatcher: Arc<RecordingDispatcher>,
    position_ms: Arc<AtomicU64>,
    muted: Arc<Mutex<Vec<bool>>>,
}

fn start(
    xml: &str,
    config: PlayerConfig,
) -> (
    Harness,
    vast_interstitial::SessionHandle,
    UnboundedReceiver<SessionEvent>,
) {
    let harness = Harness {
        dispatcher: Arc::new(RecordingDispatcher::default()),
        position_ms: Arc::new(AtomicU64::new(0)),
        muted: Arc::new(Mutex::new(Vec::new())),
    };
    let player = ScriptedPlayer {
        position_ms: harness.position_ms.clone(),
        muted: harness.muted.clone(),
        ..ScriptedPlayer::default()
    };
    let document = Arc::new(VastDocument::parse(xml, |_| {}));
    let (handle, events) = start_session(document, player, harness.dispatcher.clone(), config);
    (harness, handle, events)
}

/// Receive events until one matches, returning everything seen
async fn wait_for(
    events: &mut UnboundedReceiver<SessionEvent>,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("event stream ended early");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

async fn play_to(
    harness: &Harness,
    events: &mut UnboundedReceiver<SessionEvent>,
    position_ms: u64,
) -> Vec<SessionEvent> {
    harness.position_ms.store(position_ms, Ordering::SeqCst);
    let target = position_ms as f64 / 100.0;
    wait_for(events, |e| {
        matches!(e, SessionEvent::Progress { percent_played, .. } if *percent_played >= target)
    })
    .await
}

async fn ready(handle: &vast_interstitial::SessionHandle, events: &mut UnboundedReceiver<SessionEvent>) {
    wait_for(events, |e| matches!(e, SessionEvent::MediaResolved { .. })).await;
    handle
        .media_ready(MediaReady {
            video_length_ms: Some(10_000),
            width: 640,
            height: 360,
        })
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn full_playback_fires_each_milestone_once() {
    let (harness, handle, mut events) = start(&vast("0%"), PlayerConfig::default());
    ready(&handle, &mut events).await;

    for position in [1_000, 2_600, 5_100, 7_600, 7_600, 7_600, 8_000] {
        play_to(&harness, &mut events, position).await;
    }
    handle.media_completed().unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Completed)).await;

    assert_eq!(handle.join().await.unwrap(), SessionState::Finished);
    let d = &harness.dispatcher;
    assert_eq!(d.count("http://t.example/imp"), 1);
    for event in [
        EventType::Impression,
        EventType::Start,
        EventType::FirstQuartile,
        EventType::Midpoint,
        EventType::ThirdQuartile,
        EventType::Complete,
    ] {
        assert_eq!(d.count(&url(event)), 1, "{:?}", event);
    }
    assert_eq!(d.count(&url(EventType::Mute)), 0);
}

#[tokio::test(start_paused = true)]
async fn early_completion_sends_no_complete_beacon() {
    let (harness, handle, mut events) = start(&vast("0%"), PlayerConfig::default());
    ready(&handle, &mut events).await;

    play_to(&harness, &mut events, 4_000).await;
    handle.media_completed().unwrap();

    assert_eq!(handle.join().await.unwrap(), SessionState::Finished);
    assert_eq!(harness.dispatcher.count(&url(EventType::Complete)), 0);
    assert_eq!(harness.dispatcher.count(&url(EventType::FirstQuartile)), 1);
    assert_eq!(harness.dispatcher.count(&url(EventType::Midpoint)), 0);
}

#[tokio::test(start_paused = true)]
async fn close_is_refused_until_skip_offset() {
    let (harness, handle, mut events) = start(&vast("30%"), PlayerConfig::default());
    ready(&handle, &mut events).await;

    play_to(&harness, &mut events, 1_000).await;
    assert!(!handle.can_close());
    assert!(!handle.request_close().unwrap());

    let seen = play_to(&harness, &mut events, 3_000).await;
    assert!(seen.contains(&SessionEvent::CanCloseChanged { can_close: true }));
    assert!(handle.can_close());

    // Seeking back does not revert the latch
    play_to(&harness, &mut events, 500).await;
    assert!(handle.can_close());

    assert!(handle.request_close().unwrap());
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
    assert_eq!(harness.dispatcher.count(&url(EventType::FinalReturn)), 1);
    assert_eq!(harness.dispatcher.count(&url(EventType::Complete)), 0);
}

#[tokio::test(start_paused = true)]
async fn user_toggles_and_orientation_fire_immediately() {
    let config = PlayerConfig {
        start_muted: true,
        ..PlayerConfig::default()
    };
    let (harness, handle, mut events) = start(&vast("0%"), config);
    ready(&handle, &mut events).await;
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::StateChanged { state: SessionState::Running })
    })
    .await;
    assert_eq!(harness.dispatcher.count(&url(EventType::Mute)), 1);

    handle.toggle_mute().unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::MuteChanged { muted: false })).await;
    assert_eq!(harness.dispatcher.count(&url(EventType::Unmute)), 1);
    assert_eq!(*harness.muted.lock().unwrap(), vec![true, false]);

    handle.orientation_changed().unwrap();
    handle.shutdown().unwrap();
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
    assert_eq!(harness.dispatcher.count(&url(EventType::Fullscreen)), 1);
}

#[tokio::test(start_paused = true)]
async fn media_error_cancels_and_reports_failure() {
    let (harness, handle, mut events) = start(&vast("0%"), PlayerConfig::default());
    ready(&handle, &mut events).await;
    play_to(&harness, &mut events, 9_000).await;

    handle.media_error("decoder failure").unwrap();
    let seen = wait_for(&mut events, |e| matches!(e, SessionEvent::Cancelled)).await;
    assert!(seen.contains(&SessionEvent::Failed {
        reason: "decoder failure".to_string()
    }));
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
    assert_eq!(harness.dispatcher.count(&url(EventType::Complete)), 0);
}

#[tokio::test]
async fn missing_media_file_fails_the_session() {
    let (_harness, handle, mut events) = start("<VAST><broken", PlayerConfig::default());
    let seen = wait_for(&mut events, |e| matches!(e, SessionEvent::Cancelled)).await;
    assert!(matches!(seen[0], SessionEvent::Failed { .. }));
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn session_waits_for_pending_wrapper() {
    let wrapper = r#"<VAST version="2.0"><Ad><Wrapper>
        <VASTAdTagURI>http://next.example/vast.xml</VASTAdTagURI>
        <Impression>http://wrapper.example/imp</Impression>
    </Wrapper></Ad></VAST>"#;
    let mut requests = Vec::new();
    let document = Arc::new(VastDocument::parse(wrapper, |r| requests.push(r)));
    let request = requests.remove(0);

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let player = ScriptedPlayer::default();
    let (handle, mut events) =
        start_session(document, player, dispatcher.clone(), PlayerConfig::default());

    tokio::time::sleep(Duration::from_secs(1)).await;
    request
        .handle
        .attach(VastDocument::parse(&vast("0%"), |_| {}))
        .unwrap();

    let seen = wait_for(&mut events, |e| matches!(e, SessionEvent::MediaResolved { .. })).await;
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::MediaResolved {
            url: "http://m.example/video.mp4".to_string()
        })
    );

    handle
        .media_ready(MediaReady {
            video_length_ms: None,
            width: 0,
            height: 0,
        })
        .unwrap();
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::StateChanged { state: SessionState::Running })
    })
    .await;
    handle.shutdown().unwrap();
    handle.join().await.unwrap();

    // Impressions from both levels, outer first
    let fired = dispatcher.fired.lock().unwrap().clone();
    let imp_wrapper = fired.iter().position(|u| u == "http://wrapper.example/imp");
    let imp_inline = fired.iter().position(|u| u == "http://t.example/imp");
    assert!(imp_wrapper.is_some() && imp_inline.is_some());
    assert!(imp_wrapper < imp_inline);
}

#[tokio::test(start_paused = true)]
async fn paused_playback_stops_sampling_until_resumed() {
    let (harness, handle, mut events) = start(&vast("0%"), PlayerConfig::default());
    ready(&handle, &mut events).await;
    play_to(&harness, &mut events, 1_000).await;

    handle.pause().unwrap();
    let mut snapshots = handle.subscribe();
    snapshots.wait_for(|s| s.paused).await.unwrap();
    while events.try_recv().is_ok() {}

    harness.position_ms.store(6_000, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Progress { .. } | SessionEvent::QuartileReached { .. }),
            "sampled while paused: {:?}",
            event
        );
    }
    assert_eq!(harness.dispatcher.count(&url(EventType::Pause)), 1);
    assert_eq!(harness.dispatcher.count(&url(EventType::FirstQuartile)), 0);
    assert_eq!(harness.dispatcher.count(&url(EventType::Midpoint)), 0);

    handle.resume().unwrap();
    play_to(&harness, &mut events, 6_000).await;
    assert_eq!(harness.dispatcher.count(&url(EventType::Resume)), 1);
    assert_eq!(harness.dispatcher.count(&url(EventType::FirstQuartile)), 1);
    assert_eq!(harness.dispatcher.count(&url(EventType::Midpoint)), 1);

    handle.shutdown().unwrap();
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_wrapper_pending_skips_the_media_layer() {
    let wrapper = r#"<VAST version="2.0"><Ad><Wrapper>
        <VASTAdTagURI>http://next.example/vast.xml</VASTAdTagURI>
        <Impression>http://wrapper.example/imp</Impression>
    </Wrapper></Ad></VAST>"#;
    let mut requests = Vec::new();
    let document = Arc::new(VastDocument::parse(wrapper, |r| requests.push(r)));

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let player = ScriptedPlayer::default();
    let prepared = player.prepared.clone();
    let (handle, mut events) =
        start_session(document, player, dispatcher.clone(), PlayerConfig::default());

    let started = Instant::now();
    handle.shutdown().unwrap();
    assert_eq!(handle.join().await.unwrap(), SessionState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::StateChanged {
                state: SessionState::Cancelled
            },
            SessionEvent::Cancelled,
        ]
    );
    assert!(prepared.lock().unwrap().is_empty());
    assert!(dispatcher.fired.lock().unwrap().is_empty());

    // The wrapper link is still open for whoever fetches it
    assert!(!requests[0].handle.is_settled());
}
