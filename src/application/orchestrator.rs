//! Call session orchestrator
//!
//! A single actor task owns every `CallSession`, the incoming call queue
//! and the directory view. Commands from the front end, inbound signaling,
//! connection events, negotiation completions and request timeouts are all
//! serialized onto it, so the session state machine never runs concurrently
//! with itself.
//!
//! Negotiation steps suspend on the platform, so they run in spawned tasks
//! and report back as completions. While a peer has a step in flight its
//! further signaling waits in that peer's backlog; other peers keep moving.
//! Every session carries a generation and every completion, timeout and
//! connection event is checked against it, so anything that outlived its
//! session is dropped (and any connection it created is released).

use crate::application::assistant::Assistant;
use crate::application::events::{AppEvent, EventBus};
use crate::application::text_relay::TextRelay;
use crate::config::Config;
use crate::domain::call::{
    CallRole, CallSession, CallState, CandidateDisposition, EndReason, Enqueued, IceCandidate, IncomingCallQueue,
    IncomingCallRequest, SessionDescription,
};
use crate::domain::directory::{DirectoryClient, Participant, RosterUpdate};
use crate::domain::relay::RelayedUtterance;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::generation::{Generation, GenerationTracker};
use crate::domain::shared::value_objects::{Language, PeerId};
use crate::infrastructure::metrics;
use crate::infrastructure::services::{AssistantService, AudioPlayback, SpeechRecognizer, TranslationService};
use crate::infrastructure::signaling::{ChannelEvent, ChannelEvents, Envelope, Recipient, SignalingChannel, SignalingMessage};
use crate::infrastructure::webrtc::{
    AudioOutput, CaptureDevice, ConnectionEvent, ConnectionHandle, ConnectionManager, LocalTrack, PeerConnectionFactory,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reason sent with an automatic rejection
pub const BUSY_REASON: &str = "busy";

/// Tunables taken from [`Config`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub request_timeout: Option<Duration>,
    pub log_capacity: usize,
    pub speak: Language,
    pub hear: Language,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.call.request_timeout(),
            log_capacity: config.relay.log_capacity,
            speak: config.language.speak,
            hear: config.language.hear,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// External collaborators the orchestrator drives
pub struct Collaborators {
    pub channel: Arc<dyn SignalingChannel>,
    pub channel_events: ChannelEvents,
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub output: Arc<dyn AudioOutput>,
    pub capture: Arc<dyn CaptureDevice>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn TranslationService>,
    pub assistant: Arc<dyn AssistantService>,
    pub playback: Arc<dyn AudioPlayback>,
}

/// What the front end can ask for
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join { name: String },
    Leave,
    CallPeer { peer_id: PeerId },
    AcceptIncoming,
    RejectIncoming,
    Hangup { peer_id: PeerId },
    /// `None` relays to every participant
    RelayText { to: Option<PeerId>, text: String },
    /// Recognize one utterance and relay it to everybody
    Speak,
    SetLanguage { speak: Option<Language>, hear: Option<Language> },
    Ask { prompt: String },
}

/// One session as seen from outside
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub role: CallRole,
    pub state: CallState,
    pub local_tracks: usize,
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub self_id: PeerId,
    pub display_name: Option<String>,
    pub roster: Vec<Participant>,
    pub sessions: Vec<SessionView>,
    pub incoming: Option<IncomingCallRequest>,
    pub queued_incoming: usize,
    pub log: Vec<RelayedUtterance>,
    pub speak: Language,
    pub hear: Language,
    pub receive_only: bool,
    /// An assistant question is still waiting for its reply
    pub assistant_pending: bool,
}

impl Snapshot {
    pub fn session(&self, peer_id: &PeerId) -> Option<&SessionView> {
        self.sessions.iter().find(|s| &s.peer_id == peer_id)
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| !s.state.is_terminated()).count()
    }
}

enum Request {
    Command(Command, oneshot::Sender<Result<()>>),
    Inspect(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable front door to the actor
#[derive(Clone)]
pub struct OrchestratorHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: EventBus,
}

impl OrchestratorHandle {
    /// Run `command`; action-scoped failures are returned, not published
    pub async fn execute(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Command(command, reply))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    pub async fn join(&self, name: impl Into<String>) -> Result<()> {
        self.execute(Command::Join { name: name.into() }).await
    }

    pub async fn call(&self, peer_id: &PeerId) -> Result<()> {
        self.execute(Command::CallPeer {
            peer_id: peer_id.clone(),
        })
        .await
    }

    pub async fn accept(&self) -> Result<()> {
        self.execute(Command::AcceptIncoming).await
    }

    pub async fn reject(&self) -> Result<()> {
        self.execute(Command::RejectIncoming).await
    }

    pub async fn hangup(&self, peer_id: &PeerId) -> Result<()> {
        self.execute(Command::Hangup {
            peer_id: peer_id.clone(),
        })
        .await
    }

    pub async fn relay(&self, to: Option<PeerId>, text: impl Into<String>) -> Result<()> {
        self.execute(Command::RelayText { to, text: text.into() }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.requests.send(Request::Inspect(reply)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Hang up everything and stop the actor
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

fn stopped() -> DomainError {
    DomainError::Internal("orchestrator stopped".to_string())
}

/// A platform step for one peer, run off the actor
#[derive(Debug)]
enum NegotiationStep {
    /// Create the connection and our offer (caller)
    Offer,
    /// Apply the remote offer and answer it; creates the connection if needed
    Answer(SessionDescription),
    /// Apply the remote answer (caller)
    ApplyAnswer(SessionDescription),
    /// Apply remote hints, in order
    Candidates(Vec<IceCandidate>),
}

impl NegotiationStep {
    fn name(&self) -> &'static str {
        match self {
            NegotiationStep::Offer => "offer",
            NegotiationStep::Answer(_) => "answer",
            NegotiationStep::ApplyAnswer(_) => "apply-answer",
            NegotiationStep::Candidates(_) => "candidates",
        }
    }
}

#[derive(Debug)]
enum StepOutput {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Applied,
}

#[derive(Debug)]
struct Completion {
    peer_id: PeerId,
    generation: Generation,
    step: &'static str,
    /// Connection the step ran on; `created` when the step made it
    handle: Option<ConnectionHandle>,
    created: bool,
    result: Result<StepOutput>,
}

enum Internal {
    Completed(Completion),
    RequestTimeout { peer_id: PeerId, generation: Generation },
    Recognized(Result<String>),
}

/// Per-peer bookkeeping around the session record
struct PeerSlot {
    session: CallSession,
    connection: Option<ConnectionHandle>,
    in_flight: bool,
    backlog: VecDeque<SignalingMessage>,
    /// Events from a connection still being created by the in-flight step
    early: Vec<ConnectionEvent>,
}

impl PeerSlot {
    fn new(session: CallSession) -> Self {
        Self {
            session,
            connection: None,
            in_flight: false,
            backlog: VecDeque::new(),
            early: Vec::new(),
        }
    }
}

pub struct Orchestrator {
    channel: Arc<dyn SignalingChannel>,
    manager: Arc<ConnectionManager>,
    recognizer: Arc<dyn SpeechRecognizer>,
    relay: TextRelay,
    assistant: Assistant,
    events: EventBus,
    settings: OrchestratorSettings,
    directory: DirectoryClient,
    sessions: HashMap<PeerId, PeerSlot>,
    incoming: IncomingCallQueue,
    generations: GenerationTracker<PeerId>,
    local_tracks: Vec<LocalTrack>,
    receive_only: bool,
    recognition_reported: bool,
    internal: mpsc::UnboundedSender<Internal>,
}

impl Orchestrator {
    /// Start the actor; subscribe to `events` first to see startup notices
    pub fn spawn(
        settings: OrchestratorSettings,
        collaborators: Collaborators,
        events: EventBus,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle {
            requests: requests_tx,
            events: events.clone(),
        };

        let task = tokio::spawn(async move {
            let Collaborators {
                channel,
                channel_events,
                factory,
                output,
                capture,
                recognizer,
                translator,
                assistant,
                playback,
            } = collaborators;

            let (connection_tx, connection_rx) = mpsc::unbounded_channel();
            let (internal_tx, internal_rx) = mpsc::unbounded_channel();

            let (local_tracks, receive_only) = match capture.acquire().await {
                Ok(tracks) => (tracks, false),
                Err(e) => {
                    warn!("Audio capture unavailable, calls will be receive-only: {}", e);
                    events.error(e);
                    (Vec::new(), true)
                }
            };

            let relay = TextRelay::new(
                channel.clone(),
                translator,
                playback.clone(),
                events.clone(),
                settings.log_capacity,
            );
            let assistant = Assistant::new(assistant, playback, events.clone());

            let orchestrator = Orchestrator {
                directory: DirectoryClient::new(channel.local_id().clone()),
                manager: Arc::new(ConnectionManager::new(factory, output, connection_tx)),
                channel,
                recognizer,
                relay,
                assistant,
                events,
                settings,
                sessions: HashMap::new(),
                incoming: IncomingCallQueue::new(),
                generations: GenerationTracker::new(),
                local_tracks,
                receive_only,
                recognition_reported: false,
                internal: internal_tx,
            };

            orchestrator
                .run(requests_rx, channel_events, connection_rx, internal_rx)
                .await;
        });

        (handle, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut channel_events: ChannelEvents,
        mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("Orchestrator started for {}", self.directory.self_id());
        let mut channel_open = true;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Command(command, reply)) => {
                        let result = self.handle_command(command).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Inspect(reply)) => {
                        let _ = reply.send(self.snapshot().await);
                    }
                    Some(Request::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = channel_events.recv(), if channel_open => match event {
                    Some(event) => self.on_channel_event(event).await,
                    None => {
                        warn!("Signaling channel closed");
                        channel_open = false;
                    }
                },
                Some(event) = connection_events.recv() => self.on_connection_event(event).await,
                Some(event) = internal.recv() => self.on_internal(event).await,
            }
        }

        info!("Orchestrator stopped for {}", self.directory.self_id());
    }

    // ---------------------------------------------------------------------
    // Commands

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        debug!("Command: {:?}", command);
        match command {
            Command::Join { name } => self.join(&name).await,
            Command::Leave => self.leave().await,
            Command::CallPeer { peer_id } => self.call_peer(peer_id).await,
            Command::AcceptIncoming => self.accept_incoming().await,
            Command::RejectIncoming => self.reject_incoming().await,
            Command::Hangup { peer_id } => self.hangup(&peer_id).await,
            Command::RelayText { to, text } => {
                let name = self.display_name()?;
                let to = to.map(Recipient::Peer).unwrap_or(Recipient::Everyone);
                self.relay.relay(to, &name, &text).await
            }
            Command::Speak => self.speak(),
            Command::SetLanguage { speak, hear } => {
                self.settings.speak = speak.unwrap_or(self.settings.speak);
                self.settings.hear = hear.unwrap_or(self.settings.hear);
                info!("Languages: speak={} hear={}", self.settings.speak, self.settings.hear);
                self.events.publish(AppEvent::LanguageChanged {
                    speak: self.settings.speak,
                    hear: self.settings.hear,
                });
                Ok(())
            }
            Command::Ask { prompt } => {
                self.assistant.ask(prompt, self.settings.hear);
                Ok(())
            }
        }
    }

    async fn join(&mut self, name: &str) -> Result<()> {
        let id = self.directory.join(name)?;
        let name = self.display_name()?;

        self.events.publish(AppEvent::Joined {
            id: id.clone(),
            name: name.clone(),
        });

        if let Err(e) = self.channel.send(Recipient::Directory, SignalingMessage::Join { name }).await {
            // joined locally; the next reconnect announces us again
            warn!("Failed to announce join: {}", e);
            self.events.error(e);
        }
        Ok(())
    }

    async fn leave(&mut self) -> Result<()> {
        if !self.directory.is_joined() {
            return Err(DomainError::NotJoined);
        }

        let live: Vec<PeerId> = self.live_peers();
        for peer_id in live {
            self.end_session(&peer_id, EndReason::LocalHangup, true).await;
        }
        for request in self.incoming.clear() {
            self.send_to(&request.from, SignalingMessage::CallReject { reason: None }).await;
        }

        self.directory.leave()?;
        self.events.publish(AppEvent::Left);
        self.publish_roster();
        Ok(())
    }

    async fn call_peer(&mut self, peer_id: PeerId) -> Result<()> {
        let my_name = self.display_name()?;

        if &peer_id == self.directory.self_id() {
            return Err(DomainError::Conflict("cannot call yourself".to_string()));
        }
        let peer_name = self
            .directory
            .lookup(&peer_id)
            .map(|p| p.label().to_string())
            .ok_or_else(|| DomainError::UnknownPeer(peer_id.to_string()))?;

        if self.is_live(&peer_id) {
            return Err(DomainError::Conflict(format!("already in a call with {}", peer_name)));
        }
        if self.incoming.contains(&peer_id) {
            return Err(DomainError::Conflict(format!(
                "{} is already calling you; accept instead",
                peer_name
            )));
        }

        let generation = self.generations.advance(peer_id.clone());
        let session = CallSession::outgoing(peer_id.clone(), peer_name.clone(), generation);
        self.sessions.insert(peer_id.clone(), PeerSlot::new(session));
        metrics::record_call_started("caller");
        self.flush_session_events(&peer_id);

        info!("Calling {} ({})", peer_name, peer_id);
        let request = SignalingMessage::CallRequest { from_name: my_name };
        if let Err(e) = self.channel.send(Recipient::Peer(peer_id.clone()), request).await {
            self.end_session(&peer_id, EndReason::SignalingLost, false).await;
            return Err(e);
        }

        if let Some(timeout) = self.settings.request_timeout {
            let internal = self.internal.clone();
            let peer = peer_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = internal.send(Internal::RequestTimeout {
                    peer_id: peer,
                    generation,
                });
            });
        }
        Ok(())
    }

    async fn accept_incoming(&mut self) -> Result<()> {
        let request = self
            .incoming
            .take_current()
            .ok_or_else(|| DomainError::Conflict("no incoming call to accept".to_string()))?;
        let peer_id = request.from.clone();

        if self.is_live(&peer_id) {
            self.surface_next_incoming();
            return Err(DomainError::Conflict(format!("already in a call with {}", request.label())));
        }

        let generation = self.generations.advance(peer_id.clone());
        let session = CallSession::accepted_incoming(peer_id.clone(), request.label(), generation);
        self.sessions.insert(peer_id.clone(), PeerSlot::new(session));
        metrics::record_call_started("callee");
        self.flush_session_events(&peer_id);

        info!("Accepted call from {} ({})", request.label(), peer_id);
        let result = self
            .channel
            .send(Recipient::Peer(peer_id.clone()), SignalingMessage::CallAccept)
            .await;

        self.surface_next_incoming();

        if let Err(e) = result {
            self.end_session(&peer_id, EndReason::SignalingLost, false).await;
            return Err(e);
        }
        Ok(())
    }

    async fn reject_incoming(&mut self) -> Result<()> {
        let request = self
            .incoming
            .take_current()
            .ok_or_else(|| DomainError::Conflict("no incoming call to reject".to_string()))?;

        info!("Rejected call from {} ({})", request.label(), request.from);
        let result = self
            .channel
            .send(
                Recipient::Peer(request.from.clone()),
                SignalingMessage::CallReject { reason: None },
            )
            .await;

        self.surface_next_incoming();
        result
    }

    /// Hanging up a call that already ended is a no-op
    async fn hangup(&mut self, peer_id: &PeerId) -> Result<()> {
        if !self.sessions.contains_key(peer_id) {
            return Err(DomainError::Conflict(format!("no call with {}", peer_id)));
        }
        if self.is_live(peer_id) {
            self.end_session(peer_id, EndReason::LocalHangup, true).await;
        } else {
            debug!("Call with {} already ended", peer_id);
        }
        Ok(())
    }

    fn speak(&mut self) -> Result<()> {
        self.display_name()?;

        let recognizer = self.recognizer.clone();
        let internal = self.internal.clone();
        let language = self.settings.speak;
        tokio::spawn(async move {
            let result = recognizer.recognize(language).await;
            let _ = internal.send(Internal::Recognized(result));
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound signaling

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(envelope) => self.on_envelope(envelope).await,
            ChannelEvent::Disconnected => {
                warn!("Signaling link lost");
                self.events.notice("signaling connection lost, reconnecting");
            }
            ChannelEvent::Reconnected => self.on_reconnected().await,
        }
    }

    async fn on_reconnected(&mut self) {
        info!("Signaling reconnected, tearing down sessions");

        for peer_id in self.live_peers() {
            self.end_session(&peer_id, EndReason::SignalingLost, false).await;
        }
        for request in self.incoming.clear() {
            self.events.publish(AppEvent::IncomingWithdrawn { from: request.from });
        }

        if let Some(name) = self.directory.display_name().map(str::to_string) {
            if let Err(e) = self.channel.send(Recipient::Directory, SignalingMessage::Join { name }).await {
                warn!("Failed to rejoin after reconnect: {}", e);
                self.events.error(DomainError::Directory(format!("rejoin failed: {}", e)));
            }
        }
        self.events.notice("signaling reconnected");
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        let Envelope { from, message, .. } = envelope;

        match message {
            SignalingMessage::PeerList(peers) => self.on_roster(RosterUpdate::Snapshot(peers)).await,
            SignalingMessage::PeerJoined(peer) => self.on_roster(RosterUpdate::Joined(peer)).await,
            SignalingMessage::PeerLeft { id } => self.on_roster(RosterUpdate::Left(id)).await,
            SignalingMessage::Error { code, message } => {
                warn!("Rendezvous error {}: {}", code, message);
                self.events
                    .error(DomainError::SignalingDelivery(format!("{}: {}", code, message)));
            }
            SignalingMessage::PeerText { text, name } => match from {
                Some(from) => {
                    let name = if name.trim().is_empty() {
                        from.to_string()
                    } else {
                        name
                    };
                    self.relay.on_relayed(from, name, text, self.settings.hear);
                }
                None => self.drop_message("peer-text", None, "no sender"),
            },
            SignalingMessage::Join { .. } => self.drop_message("join", from.as_ref(), "not for clients"),
            message => match from {
                Some(from) if &from != self.directory.self_id() => self.on_peer_message(from, message).await,
                from => self.drop_message(message.kind(), from.as_ref(), "no usable sender"),
            },
        }
    }

    async fn on_roster(&mut self, update: RosterUpdate) {
        if !self.directory.is_joined() {
            debug!("Ignoring roster update before join");
            return;
        }

        self.directory.apply(update);
        self.publish_roster();

        // sessions and requests from peers that are gone cannot continue
        let gone: Vec<PeerId> = self
            .live_peers()
            .into_iter()
            .filter(|peer_id| !self.directory.contains(peer_id))
            .collect();
        for peer_id in gone {
            info!("{} left the directory", peer_id);
            self.end_session(&peer_id, EndReason::RemoteHangup, false).await;
        }

        let withdrawn: Vec<PeerId> = self
            .incoming_peers()
            .into_iter()
            .filter(|peer_id| !self.directory.contains(peer_id))
            .collect();
        for peer_id in withdrawn {
            self.withdraw_incoming(&peer_id);
        }
    }

    /// Session-scoped traffic from `from`
    async fn on_peer_message(&mut self, from: PeerId, message: SignalingMessage) {
        if !self.directory.is_joined() {
            self.drop_message(message.kind(), Some(&from), "not joined");
            return;
        }

        if let SignalingMessage::CallRequest { from_name } = message {
            self.on_call_request(from, from_name).await;
            return;
        }
        if let SignalingMessage::Hangup = message {
            self.on_remote_hangup(&from).await;
            return;
        }

        let (live, in_flight) = self
            .sessions
            .get(&from)
            .map(|slot| (slot.session.is_live(), slot.in_flight))
            .unwrap_or((false, false));

        if !live {
            self.drop_message(message.kind(), Some(&from), "no live session");
        } else if in_flight {
            debug!("Queueing {} from {} behind in-flight step", message.kind(), from);
            if let Some(slot) = self.sessions.get_mut(&from) {
                slot.backlog.push_back(message);
            }
        } else {
            self.dispatch(&from, message).await;
        }
    }

    async fn on_call_request(&mut self, from: PeerId, from_name: String) {
        let label = if from_name.trim().is_empty() {
            self.directory
                .lookup(&from)
                .map(|p| p.label().to_string())
                .unwrap_or_else(|| from.to_string())
        } else {
            from_name
        };

        if let Some(slot) = self.sessions.get(&from).filter(|s| s.session.is_live()) {
            let our_pending_request =
                slot.session.role() == CallRole::Caller && *slot.session.state() == CallState::Requesting;

            if our_pending_request && self.directory.self_id() > &from {
                // both sides called each other; the lower id keeps its request
                info!("Crossed call requests with {}, yielding", from);
                self.end_session(&from, EndReason::Busy, false).await;
            } else {
                debug!("Duplicate call request from {} while {}", from, slot.session.state().as_str());
                self.send_to(
                    &from,
                    SignalingMessage::CallReject {
                        reason: Some(BUSY_REASON.to_string()),
                    },
                )
                .await;
                return;
            }
        }

        match self.incoming.push(IncomingCallRequest::new(from.clone(), label)) {
            Enqueued::Surfaced => {
                if let Some(request) = self.incoming.current().cloned() {
                    info!("Incoming call from {} ({})", request.label(), from);
                    self.events.publish(AppEvent::IncomingCall(request));
                }
            }
            Enqueued::Queued { position } => {
                info!("Incoming call from {} queued at {}", from, position);
                if let Some(request) = self.incoming_request(&from) {
                    self.events.publish(AppEvent::IncomingQueued { request, position });
                }
            }
            Enqueued::Duplicate => {
                self.drop_message("call-request", Some(&from), "already waiting for a decision");
            }
        }
    }

    async fn on_remote_hangup(&mut self, from: &PeerId) {
        if self.is_live(from) {
            info!("{} hung up", from);
            self.end_session(from, EndReason::RemoteHangup, false).await;
        } else if self.incoming.contains(from) {
            self.withdraw_incoming(from);
        } else {
            self.drop_message("hangup", Some(from), "no live session");
        }
    }

    /// Apply one message to a live session with nothing in flight
    async fn dispatch(&mut self, peer_id: &PeerId, message: SignalingMessage) {
        let Some(slot) = self.sessions.get_mut(peer_id) else {
            return;
        };
        let kind = message.kind();

        let step = match message {
            SignalingMessage::CallAccept => {
                if slot.session.remote_accepted().is_err() {
                    self.drop_message(kind, Some(peer_id), "not waiting for an accept");
                    return;
                }
                if let Err(e) = slot.session.begin_negotiation() {
                    error!("Cannot start negotiation with {}: {}", peer_id, e);
                    return;
                }
                Some(NegotiationStep::Offer)
            }
            SignalingMessage::CallReject { reason } => {
                if *slot.session.state() != CallState::Requesting {
                    self.drop_message(kind, Some(peer_id), "not waiting for an answer");
                    return;
                }
                let end = match reason.as_deref() {
                    Some(BUSY_REASON) => EndReason::Busy,
                    _ => EndReason::Rejected,
                };
                self.end_session(peer_id, end, false).await;
                None
            }
            SignalingMessage::Offer { sdp } => {
                let acceptable = slot.session.role() == CallRole::Callee
                    && matches!(
                        slot.session.state(),
                        CallState::Accepted | CallState::Negotiating | CallState::Active
                    );
                if !acceptable || slot.session.begin_negotiation().is_err() {
                    self.drop_message(kind, Some(peer_id), "offer not expected");
                    return;
                }
                Some(NegotiationStep::Answer(sdp))
            }
            SignalingMessage::Answer { sdp } => {
                if slot.session.role() != CallRole::Caller
                    || *slot.session.state() != CallState::Negotiating
                    || slot.connection.is_none()
                {
                    self.drop_message(kind, Some(peer_id), "answer not expected");
                    return;
                }
                Some(NegotiationStep::ApplyAnswer(sdp))
            }
            SignalingMessage::IceCandidate { candidate } => match slot.session.receive_candidate(candidate.clone()) {
                Ok(CandidateDisposition::Buffered) => {
                    debug!("Buffered candidate from {} ({} pending)", peer_id, slot.session.pending_candidates().len());
                    None
                }
                Ok(CandidateDisposition::Apply(connection)) => {
                    if slot.connection.as_ref().map(|h| h.id) != Some(connection) {
                        self.drop_message(kind, Some(peer_id), "connection mismatch");
                        return;
                    }
                    Some(NegotiationStep::Candidates(vec![candidate]))
                }
                Err(_) => {
                    self.drop_message(kind, Some(peer_id), "candidate not expected");
                    return;
                }
            },
            other => {
                self.drop_message(other.kind(), Some(peer_id), "unexpected");
                return;
            }
        };

        self.flush_session_events(peer_id);
        if let Some(step) = step {
            self.start_step(peer_id, step);
        }
    }

    // ---------------------------------------------------------------------
    // Negotiation steps

    fn start_step(&mut self, peer_id: &PeerId, step: NegotiationStep) {
        let Some(slot) = self.sessions.get_mut(peer_id) else {
            return;
        };

        slot.in_flight = true;
        let generation = slot.session.generation();
        let existing = slot.connection.clone();
        let manager = self.manager.clone();
        let tracks = self.local_tracks.clone();
        let internal = self.internal.clone();
        let peer = peer_id.clone();

        debug!("Starting {} step for {} ({})", step.name(), peer_id, generation);
        tokio::spawn(async move {
            let completion = run_step(manager, tracks, peer, generation, existing, step).await;
            let _ = internal.send(Internal::Completed(completion));
        });
    }

    async fn on_completion(&mut self, completion: Completion) {
        let Completion {
            peer_id,
            generation,
            step,
            handle,
            created,
            result,
        } = completion;

        let current = self
            .sessions
            .get(&peer_id)
            .map(|slot| slot.session.generation() == generation && slot.session.is_live())
            .unwrap_or(false);

        if !current {
            debug!("Dropping stale {} completion for {} ({})", step, peer_id, generation);
            if created {
                if let Some(handle) = handle {
                    self.release_connection(handle);
                }
            }
            return;
        }

        let Some(slot) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        slot.in_flight = false;

        let mut replay = Vec::new();
        if created {
            if let Some(handle) = handle.clone() {
                replay = slot.session.attach_connection(handle.id, self.local_tracks.len());
                slot.connection = Some(handle);
            }
        }

        match result {
            Ok(StepOutput::Offer(sdp)) => {
                debug!("Sending offer to {}", peer_id);
                if !self.send_negotiation(&peer_id, SignalingMessage::Offer { sdp }).await {
                    return;
                }
            }
            Ok(StepOutput::Answer(sdp)) => {
                debug!("Sending answer to {}", peer_id);
                if !self.send_negotiation(&peer_id, SignalingMessage::Answer { sdp }).await {
                    return;
                }
            }
            Ok(StepOutput::Applied) => {}
            Err(e) if step == "candidates" => {
                warn!("Candidate from {} rejected: {}", peer_id, e);
            }
            Err(e) => {
                warn!("{} step for {} failed: {}", step, peer_id, e);
                let reason = match &e {
                    DomainError::ConnectionFailed(detail) => EndReason::ConnectionFailed(detail.clone()),
                    other => EndReason::NegotiationFailed(other.to_string()),
                };
                self.end_session(&peer_id, reason, true).await;
                return;
            }
        }

        let early = self
            .sessions
            .get_mut(&peer_id)
            .map(|slot| std::mem::take(&mut slot.early))
            .unwrap_or_default();
        for event in early {
            self.on_connection_event(event).await;
        }
        if !self.is_live(&peer_id) {
            return;
        }

        if !replay.is_empty() {
            debug!("Replaying {} buffered candidate(s) for {}", replay.len(), peer_id);
            self.start_step(&peer_id, NegotiationStep::Candidates(replay));
            return;
        }
        self.drain_backlog(&peer_id).await;
    }

    /// Feed queued messages until one starts a new step
    async fn drain_backlog(&mut self, peer_id: &PeerId) {
        loop {
            let next = match self.sessions.get_mut(peer_id) {
                Some(slot) if slot.session.is_live() && !slot.in_flight => slot.backlog.pop_front(),
                _ => return,
            };
            match next {
                Some(message) => self.dispatch(peer_id, message).await,
                None => return,
            }
        }
    }

    /// Send an offer or answer; a lost artifact ends the session
    async fn send_negotiation(&mut self, peer_id: &PeerId, message: SignalingMessage) -> bool {
        match self.channel.send(Recipient::Peer(peer_id.clone()), message).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver negotiation to {}: {}", peer_id, e);
                self.events.error(e);
                self.end_session(peer_id, EndReason::SignalingLost, false).await;
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Connection events

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        let handle = event.handle().clone();
        let matches = self
            .sessions
            .get(&handle.peer_id)
            .map(|slot| slot.session.is_live() && slot.connection.as_ref() == Some(&handle))
            .unwrap_or(false);

        if !matches {
            // the in-flight step may still be creating this connection
            if let Some(slot) = self
                .sessions
                .get_mut(&handle.peer_id)
                .filter(|slot| slot.session.is_live() && slot.in_flight && slot.connection.is_none())
            {
                debug!("Holding event for connection {} until it is attached", handle.id);
                slot.early.push(event);
                return;
            }
            debug!("Dropping connection event for stale connection {} ({})", handle.id, handle.peer_id);
            return;
        }

        match event {
            ConnectionEvent::LocalCandidate { candidate, .. } => {
                self.send_to(&handle.peer_id, SignalingMessage::IceCandidate { candidate })
                    .await;
            }
            ConnectionEvent::TrackRouted { track_id, first, .. } => {
                debug!("Track {} from {} routed (first: {})", track_id, handle.peer_id, first);
                if let Some(slot) = self.sessions.get_mut(&handle.peer_id) {
                    if *slot.session.state() == CallState::Negotiating {
                        match slot.session.media_started() {
                            Ok(true) => info!("Call with {} is active", handle.peer_id),
                            Ok(false) => {}
                            Err(e) => warn!("Media start for {} rejected: {}", handle.peer_id, e),
                        }
                    }
                }
                self.flush_session_events(&handle.peer_id);
            }
            ConnectionEvent::Connected { .. } => {
                info!("Connected to {}", handle.peer_id);
            }
            ConnectionEvent::Failed { reason, .. } => {
                warn!("Connection to {} failed: {}", handle.peer_id, reason);
                self.end_session(&handle.peer_id, EndReason::ConnectionFailed(reason), true)
                    .await;
            }
        }
    }

    // ---------------------------------------------------------------------
    // Internal events

    async fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::Completed(completion) => self.on_completion(completion).await,
            Internal::RequestTimeout { peer_id, generation } => {
                let waiting = self
                    .sessions
                    .get(&peer_id)
                    .map(|slot| {
                        slot.session.generation() == generation && *slot.session.state() == CallState::Requesting
                    })
                    .unwrap_or(false);

                if waiting {
                    info!("Call request to {} timed out", peer_id);
                    self.end_session(&peer_id, EndReason::Timeout, true).await;
                }
            }
            Internal::Recognized(Ok(text)) => {
                if text.trim().is_empty() {
                    self.events.notice("nothing was recognized");
                    return;
                }
                let Ok(name) = self.display_name() else {
                    return;
                };
                if let Err(e) = self.relay.relay(Recipient::Everyone, &name, &text).await {
                    self.events.error(e);
                }
            }
            Internal::Recognized(Err(e)) => match e {
                DomainError::CapabilityUnavailable(_) if self.recognition_reported => {
                    debug!("Speech recognition still unavailable");
                }
                DomainError::CapabilityUnavailable(_) => {
                    self.recognition_reported = true;
                    self.events.error(e);
                }
                other => self.events.error(other),
            },
        }
    }

    // ---------------------------------------------------------------------
    // Helpers

    /// Terminate `peer_id`'s session, release its connection and optionally
    /// tell the peer. No-op for sessions that already ended.
    async fn end_session(&mut self, peer_id: &PeerId, reason: EndReason, notify_peer: bool) {
        let Some(slot) = self.sessions.get_mut(peer_id) else {
            return;
        };
        if !slot.session.terminate(reason.clone()) {
            return;
        }

        slot.backlog.clear();
        slot.early.clear();
        slot.in_flight = false;
        let connection = slot.connection.take();
        info!("Call with {} ended: {}", peer_id, reason);

        match &reason {
            EndReason::NegotiationFailed(_) => metrics::record_call_failed("negotiation"),
            EndReason::ConnectionFailed(_) => metrics::record_call_failed("connection"),
            EndReason::SignalingLost => metrics::record_call_failed("signaling"),
            EndReason::Timeout => metrics::record_call_failed("timeout"),
            _ => {}
        }

        if let Some(handle) = connection {
            self.release_connection(handle);
        }
        self.flush_session_events(peer_id);

        if notify_peer {
            self.send_to(peer_id, SignalingMessage::Hangup).await;
        }
    }

    fn release_connection(&self, handle: ConnectionHandle) {
        let manager = self.manager.clone();
        tokio::spawn(async move {
            manager.terminate(&handle).await;
        });
    }

    /// Best-effort send; failures become a notice
    async fn send_to(&self, peer_id: &PeerId, message: SignalingMessage) {
        let kind = message.kind();
        if let Err(e) = self.channel.send(Recipient::Peer(peer_id.clone()), message).await {
            warn!("Failed to send {} to {}: {}", kind, peer_id, e);
            self.events.error(e);
        }
    }

    fn flush_session_events(&mut self, peer_id: &PeerId) {
        if let Some(slot) = self.sessions.get_mut(peer_id) {
            for event in slot.session.take_events() {
                self.events.publish(AppEvent::Session(event));
            }
        }
        metrics::set_sessions(self.live_peers().len());
    }

    fn surface_next_incoming(&self) {
        if let Some(request) = self.incoming.current().cloned() {
            info!("Next incoming call from {} ({})", request.label(), request.from);
            self.events.publish(AppEvent::IncomingCall(request));
        }
    }

    fn withdraw_incoming(&mut self, peer_id: &PeerId) {
        if let Some(was_head) = self.incoming.withdraw(peer_id) {
            info!("Incoming call from {} withdrawn", peer_id);
            self.events.publish(AppEvent::IncomingWithdrawn { from: peer_id.clone() });
            if was_head {
                self.surface_next_incoming();
            }
        }
    }

    fn incoming_request(&self, peer_id: &PeerId) -> Option<IncomingCallRequest> {
        self.incoming.iter().find(|r| &r.from == peer_id).cloned()
    }

    fn incoming_peers(&self) -> Vec<PeerId> {
        self.incoming.iter().map(|r| r.from.clone()).collect()
    }

    fn drop_message(&self, kind: &'static str, from: Option<&PeerId>, why: &str) {
        match from {
            Some(from) => debug!("Dropping {} from {}: {}", kind, from, why),
            None => debug!("Dropping {}: {}", kind, why),
        }
        metrics::record_message_dropped(kind);
    }

    fn publish_roster(&self) {
        self.events
            .publish(AppEvent::RosterChanged(self.directory.current_roster()));
    }

    fn display_name(&self) -> Result<String> {
        self.directory
            .display_name()
            .map(str::to_string)
            .ok_or(DomainError::NotJoined)
    }

    fn is_live(&self, peer_id: &PeerId) -> bool {
        self.sessions
            .get(peer_id)
            .map(|slot| slot.session.is_live())
            .unwrap_or(false)
    }

    fn live_peers(&self) -> Vec<PeerId> {
        self.sessions
            .iter()
            .filter(|(_, slot)| slot.session.is_live())
            .map(|(peer_id, _)| peer_id.clone())
            .collect()
    }

    async fn snapshot(&self) -> Snapshot {
        let mut sessions: Vec<SessionView> = self
            .sessions
            .values()
            .map(|slot| SessionView {
                peer_id: slot.session.peer_id().clone(),
                peer_name: slot.session.peer_name().to_string(),
                role: slot.session.role(),
                state: slot.session.state().clone(),
                local_tracks: slot.session.local_track_count(),
            })
            .collect();
        sessions.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        Snapshot {
            self_id: self.directory.self_id().clone(),
            display_name: self.directory.display_name().map(str::to_string),
            roster: self.directory.current_roster(),
            sessions,
            incoming: self.incoming.current().cloned(),
            queued_incoming: self.incoming.len().saturating_sub(1),
            log: self.relay.entries().await,
            speak: self.settings.speak,
            hear: self.settings.hear,
            receive_only: self.receive_only,
            assistant_pending: self.assistant.is_pending(),
        }
    }

    async fn shutdown(&mut self) {
        info!("Orchestrator shutting down");
        for peer_id in self.live_peers() {
            self.end_session(&peer_id, EndReason::LocalHangup, true).await;
        }
        self.assistant.cancel();
        self.manager.terminate_all().await;
    }
}

/// Run one platform step against the connection manager
async fn run_step(
    manager: Arc<ConnectionManager>,
    tracks: Vec<LocalTrack>,
    peer_id: PeerId,
    generation: Generation,
    existing: Option<ConnectionHandle>,
    step: NegotiationStep,
) -> Completion {
    let name = step.name();
    let mut handle = existing;
    let mut created = false;

    let result = async {
        match step {
            NegotiationStep::Offer => {
                let h = connection(&manager, &peer_id, &tracks, &mut handle, &mut created).await?;
                manager.create_offer(&h).await.map(StepOutput::Offer)
            }
            NegotiationStep::Answer(offer) => {
                let h = connection(&manager, &peer_id, &tracks, &mut handle, &mut created).await?;
                manager.create_answer(&h, offer).await.map(StepOutput::Answer)
            }
            NegotiationStep::ApplyAnswer(answer) => {
                let h = handle
                    .clone()
                    .ok_or_else(|| DomainError::Negotiation("answer before connection".to_string()))?;
                manager.set_remote_description(&h, answer).await?;
                Ok(StepOutput::Applied)
            }
            NegotiationStep::Candidates(candidates) => {
                let h = handle
                    .clone()
                    .ok_or_else(|| DomainError::Negotiation("candidate before connection".to_string()))?;
                for candidate in candidates {
                    let hint = candidate.candidate.clone();
                    if let Err(e) = manager.add_candidate(&h, candidate).await {
                        warn!("Candidate {} from {} rejected: {}", hint, peer_id, e);
                    }
                }
                Ok(StepOutput::Applied)
            }
        }
    }
    .await;

    Completion {
        peer_id,
        generation,
        step: name,
        handle,
        created,
        result,
    }
}

/// Reuse the session's connection or create it
async fn connection(
    manager: &ConnectionManager,
    peer_id: &PeerId,
    tracks: &[LocalTrack],
    handle: &mut Option<ConnectionHandle>,
    created: &mut bool,
) -> Result<ConnectionHandle> {
    if let Some(existing) = handle {
        return Ok(existing.clone());
    }

    let new = manager.create_connection(peer_id, tracks).await?;
    *handle = Some(new.clone());
    *created = true;
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.call.request_timeout_secs = 0;
        config.relay.log_capacity = 10;
        config.language.hear = Language::Ja;

        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.request_timeout, None);
        assert_eq!(settings.log_capacity, 10);
        assert_eq!(settings.hear, Language::Ja);
        assert_eq!(settings.speak, Language::En);
    }

    #[test]
    fn test_snapshot_counts_live_sessions() {
        let view = |id: &str, state: CallState| SessionView {
            peer_id: PeerId::new(id),
            peer_name: id.to_string(),
            role: CallRole::Caller,
            state,
            local_tracks: 0,
        };
        let snapshot = Snapshot {
            self_id: PeerId::new("me"),
            display_name: Some("Me".into()),
            roster: vec![],
            sessions: vec![
                view("a", CallState::Active),
                view("b", CallState::Terminated(EndReason::Busy)),
            ],
            incoming: None,
            queued_incoming: 0,
            log: vec![],
            speak: Language::En,
            hear: Language::En,
            receive_only: false,
            assistant_pending: false,
        };

        assert_eq!(snapshot.live_sessions(), 1);
        assert!(snapshot.session(&PeerId::new("b")).unwrap().state.is_terminated());
    }
}
