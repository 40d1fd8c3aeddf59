//! Voice session controller.
//!
//! All session state lives in [`SessionController`], which is driven by a
//! single task consuming [`SessionEvent`]s. Capture callbacks, transport
//! tasks and the playback thread never touch that state; they only send
//! events, each tagged with the [`SessionId`] that created the resource.
//! Events from a session that has since been stopped, failed or closed are
//! discarded, which is what makes stop and close non-suspending.

pub mod setup;
pub mod state;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::analyser::Spectrum;
use crate::audio::capture::{CaptureStream, InputDevice};
use crate::audio::codec::{decode_chunk, AudioFrame};
use crate::audio::playback::{OutputDevice, Playback};
use crate::audio::scheduler::{ChunkId, Clock};
use crate::error::SessionError;
use crate::tools::ToolDispatcher;
use crate::transport::{
    AgentConfig, AgentConnector, AgentLink, TranscriptDirection, TransportEvent,
};

pub use setup::SettingsSetup;
pub use state::Phase;

/// Identifies one start..stop lifetime. Never reused within a process.
pub type SessionId = u64;

/// Input to the controller task.
#[derive(Debug)]
pub enum SessionEvent {
    Start,
    Stop,
    Transport {
        session: SessionId,
        event: TransportEvent,
    },
    Frame {
        session: SessionId,
        frame: AudioFrame,
    },
    ChunkFinished {
        session: SessionId,
        id: ChunkId,
    },
    /// Stop any running session and end the controller task.
    Shutdown,
}

/// Receives session notifications on the controller task.
pub trait SessionObserver: Send {
    fn phase_changed(&mut self, _phase: Phase) {}

    /// One completed turn. Either side may be empty, never both.
    fn turn_completed(&mut self, user_text: &str, assistant_text: &str);

    /// A fatal error, reported after every resource was released.
    fn fatal_error(&mut self, message: &str);
}

/// Resources for one session, resolved from settings at start time.
pub struct SessionPlan {
    pub agent: AgentConfig,
    pub input: Box<dyn InputDevice>,
    pub output: Box<dyn OutputDevice>,
    pub clock: Box<dyn Clock>,
}

/// Produces a fresh [`SessionPlan`] for every start.
pub trait SessionSetup: Send {
    fn prepare(&mut self) -> Result<SessionPlan, SessionError>;
}

/// Everything owned by the running session.
struct ActiveSession {
    id: SessionId,
    link: Box<dyn AgentLink>,
    input: Box<dyn InputDevice>,
    capture: Option<Box<dyn CaptureStream>>,
    playback: Playback,
    user_text: String,
    assistant_text: String,
}

pub struct SessionController {
    setup: Box<dyn SessionSetup>,
    connector: Box<dyn AgentConnector>,
    dispatcher: ToolDispatcher,
    observer: Box<dyn SessionObserver>,
    events: mpsc::UnboundedSender<SessionEvent>,
    phase_tx: watch::Sender<Phase>,
    spectrum: Spectrum,
    next_id: SessionId,
    active: Option<ActiveSession>,
}

/// Create the controller's event channel.
pub fn event_channel() -> (
    mpsc::UnboundedSender<SessionEvent>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    mpsc::unbounded_channel()
}

impl SessionController {
    pub fn new(
        setup: Box<dyn SessionSetup>,
        connector: Box<dyn AgentConnector>,
        dispatcher: ToolDispatcher,
        observer: Box<dyn SessionObserver>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Self {
            setup,
            connector,
            dispatcher,
            observer,
            events,
            phase_tx,
            spectrum: Spectrum::new(),
            next_id: 0,
            active: None,
        }
    }

    /// A cloneable handle for the UI side.
    pub fn handle(&self) -> VoiceSession {
        VoiceSession {
            events: self.events.clone(),
            phase: self.phase_tx.subscribe(),
            spectrum: self.spectrum.clone(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    /// Run the controller until [`SessionEvent::Shutdown`] arrives.
    ///
    /// The controller keeps its own sender for device and transport
    /// callbacks, so the channel never closes by itself.
    pub fn spawn(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if matches!(event, SessionEvent::Shutdown) {
                    break;
                }
                self.handle_event(event);
            }
            self.stop();
            debug!("Session controller exiting");
        })
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start => self.start(),
            SessionEvent::Stop | SessionEvent::Shutdown => self.stop(),
            SessionEvent::Transport { session, event } => {
                if self.is_current(session) {
                    self.on_transport(event);
                } else {
                    debug!(session, "Dropping transport event from a closed session");
                }
            }
            SessionEvent::Frame { session, frame } => {
                if self.is_current(session) {
                    self.on_frame(frame);
                }
            }
            SessionEvent::ChunkFinished { session, id } => {
                if self.is_current(session) {
                    self.on_chunk_finished(id);
                }
            }
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.active.as_ref().is_some_and(|s| s.id == session)
    }

    // ── Controls ────────────────────────────────────────────────────

    fn start(&mut self) {
        let phase = self.phase();
        if !phase.can_start() {
            debug!(%phase, "Start ignored, session already running");
            return;
        }

        self.next_id += 1;
        let id = self.next_id;
        info!(session = id, "Starting voice session");
        self.set_phase(Phase::Connecting);

        match self.open_session(id) {
            Ok(session) => self.active = Some(session),
            Err(e) => self.fail(e.to_string()),
        }
    }

    /// Open the speaker and the agent link. Capture waits for `Opened`.
    fn open_session(&mut self, id: SessionId) -> Result<ActiveSession, SessionError> {
        let SessionPlan {
            agent,
            input,
            mut output,
            clock,
        } = self.setup.prepare()?;

        let events = self.events.clone();
        let speaker = output.open(
            self.spectrum.attach(),
            std::sync::Arc::new(move |chunk: ChunkId| {
                let _ = events.send(SessionEvent::ChunkFinished {
                    session: id,
                    id: chunk,
                });
            }),
        )?;
        let playback = Playback::new(speaker, clock, self.spectrum.clone());

        let events = self.events.clone();
        let link = self.connector.open(
            agent,
            Box::new(move |event: TransportEvent| {
                let _ = events.send(SessionEvent::Transport { session: id, event });
            }),
        )?;

        Ok(ActiveSession {
            id,
            link,
            input,
            capture: None,
            playback,
            user_text: String::new(),
            assistant_text: String::new(),
        })
    }

    /// Idempotent. Never waits for the remote side.
    pub fn stop(&mut self) {
        if self.teardown() {
            info!("Voice session stopped");
        }
        if self.phase() != Phase::Idle {
            self.set_phase(Phase::Idle);
        }
    }

    /// Release every owned resource. Returns whether a session was running.
    fn teardown(&mut self) -> bool {
        let Some(mut session) = self.active.take() else {
            return false;
        };
        if let Some(mut capture) = session.capture.take() {
            capture.stop();
        }
        session.playback.flush();
        session.link.close();
        true
    }

    fn fail(&mut self, message: String) {
        error!("Voice session failed: {}", message);
        self.teardown();
        self.set_phase(Phase::Error);
        self.observer.fatal_error(&message);
    }

    fn set_phase(&mut self, phase: Phase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "Phase change");
            self.spectrum.set_live(phase.is_active());
            self.observer.phase_changed(phase);
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::ToolCall(invocations) => {
                let Some(session) = self.active.as_mut() else {
                    return;
                };
                for result in self.dispatcher.dispatch_all(&invocations) {
                    session.link.send_tool_result(result);
                }
            }
            TransportEvent::Transcript { direction, text } => {
                if let Some(session) = self.active.as_mut() {
                    match direction {
                        TranscriptDirection::Input => session.user_text.push_str(&text),
                        TranscriptDirection::Output => session.assistant_text.push_str(&text),
                    }
                }
            }
            TransportEvent::TurnComplete => self.on_turn_complete(),
            TransportEvent::AudioChunk { pcm, sample_rate } => {
                self.on_audio_chunk(&pcm, sample_rate)
            }
            TransportEvent::Interrupted => {
                if let Some(session) = self.active.as_mut() {
                    let dropped = session.playback.flush();
                    debug!(dropped, "Agent interrupted");
                }
                if matches!(self.phase(), Phase::Speaking | Phase::Listening) {
                    self.set_phase(Phase::Listening);
                }
            }
            TransportEvent::Error(message) => self.fail(message),
            TransportEvent::Closed => {
                info!("Agent closed the session");
                self.teardown();
                if self.phase() != Phase::Error {
                    self.set_phase(Phase::Idle);
                }
            }
        }
    }

    fn on_opened(&mut self) {
        if self.phase() != Phase::Connecting {
            return;
        }
        let Some(session) = self.active.as_mut() else {
            return;
        };

        let events = self.events.clone();
        let id = session.id;
        let started = session.input.start(Box::new(move |frame: AudioFrame| {
            let _ = events.send(SessionEvent::Frame { session: id, frame });
        }));

        match started {
            Ok(capture) => {
                session.capture = Some(capture);
                self.set_phase(Phase::Listening);
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn on_turn_complete(&mut self) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        let user = std::mem::take(&mut session.user_text);
        let assistant = std::mem::take(&mut session.assistant_text);
        let (user, assistant) = (user.trim(), assistant.trim());
        if user.is_empty() && assistant.is_empty() {
            return;
        }
        self.observer.turn_completed(user, assistant);
    }

    fn on_audio_chunk(&mut self, pcm: &[u8], sample_rate: u32) {
        if !matches!(self.phase(), Phase::Listening | Phase::Speaking) {
            return;
        }
        let Some(session) = self.active.as_mut() else {
            return;
        };
        match decode_chunk(pcm, sample_rate, 1) {
            Ok(chunk) => {
                session.playback.enqueue(chunk);
                if self.phase() == Phase::Listening {
                    self.set_phase(Phase::Speaking);
                }
            }
            Err(e) => warn!("Dropping agent audio: {}", e),
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if !matches!(self.phase(), Phase::Listening | Phase::Speaking) {
            return;
        }
        if let Some(session) = self.active.as_mut() {
            session.link.send_audio(&frame);
        }
    }

    fn on_chunk_finished(&mut self, id: ChunkId) {
        let Some(session) = self.active.as_mut() else {
            return;
        };
        if session.playback.chunk_finished(id) && self.phase() == Phase::Speaking {
            self.set_phase(Phase::Listening);
        }
    }
}

/// UI-facing handle. Controls are fire-and-forget and idempotent.
#[derive(Clone)]
pub struct VoiceSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    phase: watch::Receiver<Phase>,
    spectrum: Spectrum,
}

impl VoiceSession {
    pub fn start(&self) {
        let _ = self.events.send(SessionEvent::Start);
    }

    pub fn stop(&self) {
        let _ = self.events.send(SessionEvent::Stop);
    }

    /// Stop the session and end the controller task.
    pub fn shutdown(&self) {
        let _ = self.events.send(SessionEvent::Shutdown);
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Current output spectrum. Safe to call every display frame.
    pub fn spectrum(&self) -> Vec<u8> {
        self.spectrum.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::audio::playback::tests::{FakeOutput, OutputCall};
    use crate::audio::playback::{AudioOutput, ChunkFinished};
    use crate::audio::ring_buffer::TapProducer;
    use crate::audio::scheduler::tests::ManualClock;
    use crate::error::{AudioError, TransportError};
    use crate::jobs::MemoryJobStore;
    use crate::mail::HostMailSync;
    use crate::tools::tests::invocation;
    use crate::tools::{ToolResult, LIST_JOB_APPLICATIONS, SAVE_JOB_APPLICATION};
    use crate::transport::EventSink;

    // ── Fakes ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct Record {
        phases: Vec<Phase>,
        turns: Vec<(String, String)>,
        errors: Vec<String>,
        sent_audio: usize,
        tool_results: Vec<ToolResult>,
        links_opened: usize,
        links_closed: usize,
        captures_started: usize,
        captures_stopped: usize,
    }

    type Shared = Arc<Mutex<Record>>;

    struct Observer(Shared);

    impl SessionObserver for Observer {
        fn phase_changed(&mut self, phase: Phase) {
            self.0.lock().unwrap().phases.push(phase);
        }
        fn turn_completed(&mut self, user: &str, assistant: &str) {
            self.0
                .lock()
                .unwrap()
                .turns
                .push((user.to_string(), assistant.to_string()));
        }
        fn fatal_error(&mut self, message: &str) {
            let mut rec = self.0.lock().unwrap();
            // Resources must already be released.
            assert_eq!(rec.links_opened, rec.links_closed);
            assert_eq!(rec.captures_started, rec.captures_stopped);
            rec.errors.push(message.to_string());
        }
    }

    struct Link(Shared);

    impl AgentLink for Link {
        fn send_audio(&mut self, _frame: &AudioFrame) {
            self.0.lock().unwrap().sent_audio += 1;
        }
        fn send_tool_result(&mut self, result: ToolResult) {
            self.0.lock().unwrap().tool_results.push(result);
        }
        fn close(&mut self) {
            self.0.lock().unwrap().links_closed += 1;
        }
    }

    struct Connector {
        rec: Shared,
        fail: bool,
    }

    impl AgentConnector for Connector {
        fn open(
            &mut self,
            _config: AgentConfig,
            _sink: EventSink,
        ) -> Result<Box<dyn AgentLink>, TransportError> {
            if self.fail {
                return Err(TransportError::MissingApiKey);
            }
            self.rec.lock().unwrap().links_opened += 1;
            Ok(Box::new(Link(self.rec.clone())))
        }
    }

    struct Capture(Shared, bool);

    impl CaptureStream for Capture {
        fn stop(&mut self) {
            if !self.1 {
                self.1 = true;
                self.0.lock().unwrap().captures_stopped += 1;
            }
        }
    }

    struct Mic {
        rec: Shared,
        deny: bool,
    }

    impl InputDevice for Mic {
        fn start(
            &mut self,
            _on_frame: crate::audio::capture::FrameCallback,
        ) -> Result<Box<dyn CaptureStream>, AudioError> {
            if self.deny {
                return Err(AudioError::DeviceUnavailable("permission denied".into()));
            }
            self.rec.lock().unwrap().captures_started += 1;
            Ok(Box::new(Capture(self.rec.clone(), false)))
        }
    }

    struct Speaker(FakeOutput);

    impl OutputDevice for Speaker {
        fn open(
            &mut self,
            _tap: TapProducer,
            _on_finished: ChunkFinished,
        ) -> Result<Box<dyn AudioOutput>, AudioError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    struct Setup {
        rec: Shared,
        output: FakeOutput,
        clock: ManualClock,
        deny_mic: Arc<AtomicBool>,
    }

    impl SessionSetup for Setup {
        fn prepare(&mut self) -> Result<SessionPlan, SessionError> {
            Ok(SessionPlan {
                agent: AgentConfig {
                    api_key: "k".into(),
                    model: "m".into(),
                    endpoint: None,
                    voice_name: "Zephyr".into(),
                    system_instruction: String::new(),
                    tool_declarations: serde_json::Value::Null,
                    handshake_timeout: Duration::from_secs(1),
                },
                input: Box::new(Mic {
                    rec: self.rec.clone(),
                    deny: self.deny_mic.load(Ordering::SeqCst),
                }),
                output: Box::new(Speaker(self.output.clone())),
                clock: Box::new(self.clock.clone()),
            })
        }
    }

    struct Harness {
        ctl: SessionController,
        rx: mpsc::UnboundedReceiver<SessionEvent>,
        rec: Shared,
        output: FakeOutput,
        deny_mic: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_connector_failure(false)
        }

        fn with_connector_failure(fail: bool) -> Self {
            let rec: Shared = Arc::default();
            let output = FakeOutput::default();
            let deny_mic = Arc::new(AtomicBool::new(false));
            let (tx, rx) = event_channel();
            let dispatcher = ToolDispatcher::new(
                Arc::new(MemoryJobStore::new()),
                Arc::new(HostMailSync::new(|| {})),
            );
            let ctl = SessionController::new(
                Box::new(Setup {
                    rec: rec.clone(),
                    output: output.clone(),
                    clock: ManualClock::default(),
                    deny_mic: deny_mic.clone(),
                }),
                Box::new(Connector {
                    rec: rec.clone(),
                    fail,
                }),
                dispatcher,
                Box::new(Observer(rec.clone())),
                tx,
            );
            Self {
                ctl,
                rx,
                rec,
                output,
                deny_mic,
            }
        }

        fn session(&self) -> SessionId {
            self.ctl.next_id
        }

        fn transport(&mut self, event: TransportEvent) {
            let session = self.session();
            self.ctl
                .handle_event(SessionEvent::Transport { session, event });
        }

        fn audio(&mut self, ms: usize) {
            let bytes = vec![0u8; 24 * ms * 2];
            self.transport(TransportEvent::AudioChunk {
                pcm: bytes,
                sample_rate: 24_000,
            });
        }

        fn listening(&mut self) {
            self.ctl.handle_event(SessionEvent::Start);
            self.transport(TransportEvent::Opened);
            assert_eq!(self.ctl.phase(), Phase::Listening);
        }

        fn played_ids(&self) -> Vec<ChunkId> {
            self.output
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    OutputCall::Play(id, _) => Some(*id),
                    OutputCall::Flush => None,
                })
                .collect()
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn test_start_opens_then_listens() {
        let mut h = Harness::new();
        h.ctl.handle_event(SessionEvent::Start);
        assert_eq!(h.ctl.phase(), Phase::Connecting);
        assert_eq!(h.rec.lock().unwrap().captures_started, 0);

        h.transport(TransportEvent::Opened);
        assert_eq!(h.ctl.phase(), Phase::Listening);
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.captures_started, 1);
        assert_eq!(rec.phases, vec![Phase::Connecting, Phase::Listening]);
    }

    #[test]
    fn test_start_while_listening_is_noop() {
        let mut h = Harness::new();
        h.listening();
        h.ctl.handle_event(SessionEvent::Start);
        assert_eq!(h.ctl.phase(), Phase::Listening);
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.links_opened, 1);
        assert_eq!(rec.captures_started, 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut h = Harness::new();
        h.ctl.handle_event(SessionEvent::Stop);
        assert_eq!(h.ctl.phase(), Phase::Idle);

        h.listening();
        h.ctl.handle_event(SessionEvent::Stop);
        h.ctl.handle_event(SessionEvent::Stop);
        assert_eq!(h.ctl.phase(), Phase::Idle);
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.links_closed, 1);
        assert_eq!(rec.captures_stopped, 1);
        assert!(rec.errors.is_empty());
    }

    #[test]
    fn test_frames_are_forwarded_only_while_live() {
        let mut h = Harness::new();
        h.ctl.handle_event(SessionEvent::Start);
        let session = h.session();
        h.ctl.handle_event(SessionEvent::Frame {
            session,
            frame: AudioFrame::new(vec![0.0; 8]),
        });
        assert_eq!(h.rec.lock().unwrap().sent_audio, 0);

        h.transport(TransportEvent::Opened);
        h.ctl.handle_event(SessionEvent::Frame {
            session,
            frame: AudioFrame::new(vec![0.0; 8]),
        });
        assert_eq!(h.rec.lock().unwrap().sent_audio, 1);

        // A frame captured just before stop arrives afterwards.
        h.ctl.handle_event(SessionEvent::Stop);
        h.ctl.handle_event(SessionEvent::Frame {
            session,
            frame: AudioFrame::new(vec![0.0; 8]),
        });
        assert_eq!(h.rec.lock().unwrap().sent_audio, 1);
    }

    #[test]
    fn test_full_turn_scenario() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::Transcript {
            direction: TranscriptDirection::Input,
            text: "I applied to Acme".into(),
        });
        h.transport(TransportEvent::Transcript {
            direction: TranscriptDirection::Input,
            text: " today".into(),
        });
        h.transport(TransportEvent::TurnComplete);
        assert_eq!(
            h.rec.lock().unwrap().turns,
            vec![("I applied to Acme today".to_string(), String::new())]
        );

        // Buffers were cleared; an empty turn fires nothing.
        h.transport(TransportEvent::TurnComplete);
        assert_eq!(h.rec.lock().unwrap().turns.len(), 1);
    }

    #[test]
    fn test_tool_round_trip() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::ToolCall(vec![invocation(
            "1",
            LIST_JOB_APPLICATIONS,
            serde_json::json!({}),
        )]));
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.tool_results.len(), 1);
        assert_eq!(rec.tool_results[0].id, "1");
        assert_eq!(
            rec.tool_results[0].text,
            "You haven't added any job applications yet."
        );
    }

    #[test]
    fn test_batched_tool_calls_each_get_one_result_in_order() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::ToolCall(vec![
            invocation(
                "1",
                SAVE_JOB_APPLICATION,
                serde_json::json!({"company": "Acme", "role": "Engineer"}),
            ),
            invocation("2", LIST_JOB_APPLICATIONS, serde_json::json!({})),
        ]));
        let rec = h.rec.lock().unwrap();
        let ids: Vec<&str> = rec.tool_results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert_eq!(
            rec.tool_results[0].text,
            "Successfully added Engineer at Acme to your tracker."
        );
        assert_eq!(
            rec.tool_results[1].text,
            "You have 1 applications in your tracker:\n1. Acme - Engineer (Applied)"
        );
    }

    #[test]
    fn test_speaking_until_last_chunk_finishes() {
        let mut h = Harness::new();
        h.listening();
        h.audio(100);
        assert_eq!(h.ctl.phase(), Phase::Speaking);
        h.audio(100);

        let ids = h.played_ids();
        assert_eq!(ids.len(), 2);
        let session = h.session();
        h.ctl.handle_event(SessionEvent::ChunkFinished { session, id: ids[0] });
        assert_eq!(h.ctl.phase(), Phase::Speaking);
        h.ctl.handle_event(SessionEvent::ChunkFinished { session, id: ids[1] });
        assert_eq!(h.ctl.phase(), Phase::Listening);
    }

    #[test]
    fn test_interruption_flushes_immediately() {
        let mut h = Harness::new();
        h.listening();
        h.audio(500);
        h.audio(500);
        h.audio(500);
        assert_eq!(h.ctl.active.as_ref().unwrap().playback.pending(), 3);

        h.transport(TransportEvent::Interrupted);
        assert_eq!(h.ctl.phase(), Phase::Listening);
        assert_eq!(h.ctl.active.as_ref().unwrap().playback.pending(), 0);
        assert_eq!(
            h.output.calls.lock().unwrap().last(),
            Some(&OutputCall::Flush)
        );

        // End-of-chunk for flushed audio does not flap the phase.
        let session = h.session();
        let first = h.played_ids()[0];
        h.ctl.handle_event(SessionEvent::ChunkFinished { session, id: first });
        assert_eq!(h.ctl.phase(), Phase::Listening);
    }

    #[test]
    fn test_malformed_audio_is_dropped() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::AudioChunk {
            pcm: vec![0, 0, 0],
            sample_rate: 24_000,
        });
        assert_eq!(h.ctl.phase(), Phase::Listening);
        assert!(h.played_ids().is_empty());
        assert!(h.rec.lock().unwrap().errors.is_empty());
    }

    #[test]
    fn test_transport_error_is_fatal_and_releases_resources() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::Error("socket reset".into()));
        assert_eq!(h.ctl.phase(), Phase::Error);
        {
            let rec = h.rec.lock().unwrap();
            assert_eq!(rec.errors, vec!["socket reset".to_string()]);
            assert_eq!(rec.links_closed, 1);
            assert_eq!(rec.captures_stopped, 1);
        }

        // A close notification arriving afterwards does not override Error.
        h.transport(TransportEvent::Closed);
        assert_eq!(h.ctl.phase(), Phase::Error);

        // Error is re-enterable via start.
        h.listening();
        assert_eq!(h.rec.lock().unwrap().links_opened, 2);
    }

    #[test]
    fn test_remote_close_returns_to_idle() {
        let mut h = Harness::new();
        h.listening();
        h.transport(TransportEvent::Closed);
        assert_eq!(h.ctl.phase(), Phase::Idle);
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.links_closed, 1);
        assert!(rec.errors.is_empty());
    }

    #[test]
    fn test_denied_microphone_is_fatal() {
        let mut h = Harness::new();
        h.deny_mic.store(true, Ordering::SeqCst);
        h.ctl.handle_event(SessionEvent::Start);
        h.transport(TransportEvent::Opened);
        assert_eq!(h.ctl.phase(), Phase::Error);
        let rec = h.rec.lock().unwrap();
        assert_eq!(rec.errors.len(), 1);
        assert!(rec.errors[0].contains("permission denied"));
        assert_eq!(rec.links_closed, 1);
    }

    #[test]
    fn test_missing_key_fails_start() {
        let mut h = Harness::with_connector_failure(true);
        h.ctl.handle_event(SessionEvent::Start);
        assert_eq!(h.ctl.phase(), Phase::Error);
        assert_eq!(
            h.rec.lock().unwrap().errors,
            vec!["Gemini API key is required. Please add your API key in Settings.".to_string()]
        );
    }

    #[test]
    fn test_events_from_old_session_are_ignored() {
        let mut h = Harness::new();
        h.listening();
        let old = h.session();
        h.ctl.handle_event(SessionEvent::Stop);
        h.listening();

        h.ctl.handle_event(SessionEvent::Transport {
            session: old,
            event: TransportEvent::Error("late".into()),
        });
        assert_eq!(h.ctl.phase(), Phase::Listening);
        assert!(h.rec.lock().unwrap().errors.is_empty());
    }

    #[test]
    fn test_callbacks_route_through_channel() {
        let mut h = Harness::new();
        h.listening();
        assert!(h.rx.try_recv().is_err());
        let handle = h.ctl.handle();
        handle.stop();
        match h.rx.try_recv() {
            Ok(SessionEvent::Stop) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(handle.phase(), Phase::Listening);
    }

    #[tokio::test]
    async fn test_spawned_controller_tracks_phase() {
        let h = Harness::new();
        let handle = h.ctl.handle();
        let mut phases = handle.subscribe();
        let task = h.ctl.spawn(h.rx);

        handle.start();
        phases.changed().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), Phase::Connecting);

        handle.stop();
        phases.changed().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), Phase::Idle);

        handle.start();
        phases.changed().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), Phase::Connecting);

        // Shutdown tears the session down and ends the task.
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.phase(), Phase::Idle);
        assert_eq!(h.rec.lock().unwrap().links_closed, 2);
    }
}
