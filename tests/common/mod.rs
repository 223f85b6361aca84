//! Shared fixtures for the call flow tests
//!
//! Every participant runs a real orchestrator on a [`MemoryHub`] with a
//! recording connection factory in place of webrtc-rs.

#![allow(dead_code)]

use async_trait::async_trait;
use babelcall::application::{
    AppEvent, Collaborators, EventBus, Orchestrator, OrchestratorHandle, OrchestratorSettings, Snapshot,
};
use babelcall::domain::call::{IceCandidate, SdpKind, SessionDescription, SessionEvent};
use babelcall::domain::shared::value_objects::{Language, PeerId};
use babelcall::infrastructure::services::{
    AssistantService, LoggingPlayback, ScriptedRecognizer, Synthesized, TranslationService,
};
use babelcall::infrastructure::signaling::{ChannelEvent, ChannelEvents, MemoryChannel, MemoryHub, SignalingMessage};
use babelcall::infrastructure::webrtc::{
    LinkState, LocalTrack, OpusCapture, PeerConnection, PeerConnectionFactory, PlatformEvent, PlatformEventSender,
    RemoteTrack, RtpDrainOutput,
};
use babelcall::{DomainError, Result};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

/// Candidate text every recording connection refuses to apply
pub const REJECTED_CANDIDATE: &str = "bad";

// ---------------------------------------------------------------------------
// Connection fakes

#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub calls: Vec<String>,
    pub closed: bool,
}

struct RecordingConnection {
    log: Arc<Mutex<ConnectionLog>>,
    platform: PlatformEventSender,
    candidates: usize,
    media: bool,
}

impl RecordingConnection {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().calls.push(call.into());
    }

    fn start_media(&self) {
        if self.media {
            let _ = self
                .platform
                .send(PlatformEvent::RemoteTrack(RemoteTrack::new("audio", "remote-stream")));
        }
    }
}

#[async_trait]
impl PeerConnection for RecordingConnection {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("offer");
        for i in 1..=self.candidates {
            let _ = self
                .platform
                .send(PlatformEvent::LocalCandidate(IceCandidate::new(format!("c{}", i))));
        }
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("answer");
        self.start_media();
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(match description.kind {
            SdpKind::Offer => "remote-offer",
            SdpKind::Answer => "remote-answer",
        });
        if description.kind == SdpKind::Answer {
            self.start_media();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("candidate:{}", candidate.candidate));
        if candidate.candidate == REJECTED_CANDIDATE {
            return Err(DomainError::Negotiation("unparseable candidate".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.closed = true;
        log.calls.push("close".to_string());
        Ok(())
    }
}

struct Created {
    peer_id: PeerId,
    log: Arc<Mutex<ConnectionLog>>,
    platform: PlatformEventSender,
}

/// Factory whose connections record every call made on them
pub struct RecordingFactory {
    created: Mutex<Vec<Created>>,
    /// Local candidates each offer produces
    candidates: usize,
    /// Whether a remote track shows up once negotiation completes
    media: bool,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::with(0, true)
    }

    pub fn with(candidates: usize, media: bool) -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            candidates,
            media,
        }
    }

    /// Calls per connection to `peer_id`, oldest connection first
    pub fn calls(&self, peer_id: &PeerId) -> Vec<Vec<String>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.peer_id == peer_id)
            .map(|c| c.log.lock().unwrap().calls.clone())
            .collect()
    }

    /// How often `call` was made across every connection to `peer_id`
    pub fn count(&self, peer_id: &PeerId, call: &str) -> usize {
        self.calls(peer_id).iter().flatten().filter(|c| c.as_str() == call).count()
    }

    pub fn connections(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn open_connections(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.log.lock().unwrap().closed)
            .count()
    }

    pub fn open_connections_to(&self, peer_id: &PeerId) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.peer_id == peer_id && !c.log.lock().unwrap().closed)
            .count()
    }

    pub fn is_closed(&self, peer_id: &PeerId) -> bool {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.peer_id == peer_id)
            .all(|c| c.log.lock().unwrap().closed)
    }

    /// Report the newest connection to `peer_id` as failed
    pub fn fail(&self, peer_id: &PeerId) {
        let created = self.created.lock().unwrap();
        let connection = created
            .iter()
            .rev()
            .find(|c| &c.peer_id == peer_id)
            .expect("no connection to fail");
        let _ = connection.platform.send(PlatformEvent::LinkState(LinkState::Failed));
    }
}

#[async_trait]
impl PeerConnectionFactory for RecordingFactory {
    async fn create(&self, peer_id: &PeerId, events: PlatformEventSender) -> Result<Arc<dyn PeerConnection>> {
        let log = Arc::new(Mutex::new(ConnectionLog::default()));
        self.created.lock().unwrap().push(Created {
            peer_id: peer_id.clone(),
            log: log.clone(),
            platform: events.clone(),
        });
        Ok(Arc::new(RecordingConnection {
            log,
            platform: events,
            candidates: self.candidates,
            media: self.media,
        }))
    }
}

// ---------------------------------------------------------------------------
// Service fakes

/// Pretends to translate by tagging the text with the hear language
pub struct TaggingTranslator;

#[async_trait]
impl TranslationService for TaggingTranslator {
    async fn translate_to_speech(&self, text: &str, hear: Language) -> Result<Synthesized> {
        Ok(Synthesized {
            text: format!("[{}] {}", hear, text),
            audio: Bytes::new(),
        })
    }
}

pub struct EchoAssistant;

#[async_trait]
impl AssistantService for EchoAssistant {
    async fn ask(&self, prompt: &str, _hear: Language) -> Result<Synthesized> {
        Ok(Synthesized {
            text: format!("you asked: {}", prompt),
            audio: Bytes::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Participants

pub struct TestPeer {
    pub id: PeerId,
    pub handle: OrchestratorHandle,
    pub factory: Arc<RecordingFactory>,
    pub events: broadcast::Receiver<AppEvent>,
    pub utterances: mpsc::UnboundedSender<String>,
    pub task: JoinHandle<()>,
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        request_timeout: None,
        ..OrchestratorSettings::default()
    }
}

pub async fn spawn_peer(hub: &MemoryHub, id: &str, name: &str) -> TestPeer {
    spawn_peer_with(hub, id, name, settings(), RecordingFactory::new()).await
}

pub async fn spawn_peer_with(
    hub: &MemoryHub,
    id: &str,
    name: &str,
    settings: OrchestratorSettings,
    factory: RecordingFactory,
) -> TestPeer {
    let id = PeerId::new(id);
    let (channel, channel_events) = hub.connect(id.clone()).await;
    let factory = Arc::new(factory);
    let (recognizer, utterances) = ScriptedRecognizer::new();

    let collaborators = Collaborators {
        channel,
        channel_events,
        factory: factory.clone(),
        output: Arc::new(RtpDrainOutput),
        capture: Arc::new(OpusCapture::new(id.to_string())),
        recognizer: Arc::new(recognizer),
        translator: Arc::new(TaggingTranslator),
        assistant: Arc::new(EchoAssistant),
        playback: Arc::new(LoggingPlayback),
    };

    let bus = EventBus::default();
    let events = bus.subscribe();
    let (handle, task) = Orchestrator::spawn(settings, collaborators, bus);
    handle.join(name).await.expect("join failed");

    TestPeer {
        id,
        handle,
        factory,
        events,
        utterances,
        task,
    }
}

/// Spawn everybody and wait until each one sees the full roster
pub async fn spawn_all(hub: &MemoryHub, peers: &[(&str, &str)]) -> Vec<TestPeer> {
    let mut spawned = Vec::new();
    for (id, name) in peers {
        spawned.push(spawn_peer(hub, id, name).await);
    }
    for peer in &spawned {
        wait_for(&peer.handle, |s| s.roster.len() == peers.len() - 1).await;
    }
    spawned
}

/// Poll snapshots until `predicate` holds
pub async fn wait_for<F>(handle: &OrchestratorHandle, predicate: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = handle.snapshot().await.expect("orchestrator stopped");
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached, last snapshot: {:#?}", snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll an arbitrary condition
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn state_of(snapshot: &Snapshot, peer_id: &PeerId) -> Option<String> {
    snapshot.session(peer_id).map(|s| s.state.as_str().to_string())
}

/// Call `callee` from `caller` and wait until both sides are active
pub async fn connect(caller: &TestPeer, callee: &TestPeer) {
    caller.handle.call(&callee.id).await.expect("call failed");
    wait_for(&callee.handle, |s| {
        s.incoming.as_ref().map(|r| &r.from) == Some(&caller.id)
    })
    .await;
    callee.handle.accept().await.expect("accept failed");

    wait_for(&caller.handle, |s| state_of(s, &callee.id).as_deref() == Some("active")).await;
    wait_for(&callee.handle, |s| state_of(s, &caller.id).as_deref() == Some("active")).await;
}

/// Session events about `peer_id` received so far, by name
pub fn session_events(rx: &mut broadcast::Receiver<AppEvent>, peer_id: &PeerId) -> Vec<&'static str> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Session(event) = event {
            if event.peer_id() != peer_id {
                continue;
            }
            seen.push(match event {
                SessionEvent::Requested { .. } => "requested",
                SessionEvent::Accepted { .. } => "accepted",
                SessionEvent::Negotiating { .. } => "negotiating",
                SessionEvent::Active { .. } => "active",
                SessionEvent::Terminated { .. } => "terminated",
            });
        }
    }
    seen
}

/// Count incoming-call prompts received so far
pub fn incoming_prompts(rx: &mut broadcast::Receiver<AppEvent>) -> usize {
    let mut prompts = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AppEvent::IncomingCall(_)) {
            prompts += 1;
        }
    }
    prompts
}

// ---------------------------------------------------------------------------
// Hand-driven participant

/// A participant speaking raw signaling, for exact control over ordering
pub struct RawPeer {
    pub id: PeerId,
    pub channel: Arc<MemoryChannel>,
    pub inbox: ChannelEvents,
}

impl RawPeer {
    pub async fn join(hub: &MemoryHub, id: &str, name: &str) -> Self {
        use babelcall::infrastructure::signaling::{Recipient, SignalingChannel};

        let id = PeerId::new(id);
        let (channel, inbox) = hub.connect(id.clone()).await;
        channel
            .send(Recipient::Directory, SignalingMessage::Join { name: name.to_string() })
            .await
            .expect("join failed");
        Self { id, channel, inbox }
    }

    pub async fn send(&self, to: &PeerId, message: SignalingMessage) {
        use babelcall::infrastructure::signaling::{Recipient, SignalingChannel};

        self.channel
            .send(Recipient::Peer(to.clone()), message)
            .await
            .expect("send failed");
    }

    /// Next addressed message, skipping directory traffic
    pub async fn next(&mut self) -> SignalingMessage {
        loop {
            let event = tokio::time::timeout(WAIT, self.inbox.recv())
                .await
                .expect("no message arrived")
                .expect("hub went away");
            if let ChannelEvent::Message(envelope) = event {
                match envelope.message {
                    SignalingMessage::PeerList(_)
                    | SignalingMessage::PeerJoined(_)
                    | SignalingMessage::PeerLeft { .. } => continue,
                    message => return message,
                }
            }
        }
    }
}
