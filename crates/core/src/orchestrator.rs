//! The turn-taking state machine.
//!
//! One [`TurnOrchestrator`] drives one interview session: it joins the room,
//! greets the candidate once they arrive, listens to their audio track, and
//! for every recognised utterance runs a speak cycle (generate, synthesize,
//! play, wait). Only one speak cycle may hold the audio channel at a time;
//! anything arriving while it is held is dropped.
//!
//! Room events are consumed from the transport's event channel by a single
//! task per session. Everything that can suspend (the settling delay,
//! collaborator calls, waiting out playback) runs in child tasks so the event
//! loop keeps draining.

use crate::audio::AudioFormat;
use crate::config::AgentConfig;
use crate::conversation::{SharedConversation, Turn, begin_turn};
use crate::error::{SynthesisError, TranscriptionError, TransportError};
use crate::generator::{ResponseGenerator, Utterance, UtteranceSource};
use crate::playback::{AudioPlaybackScheduler, PlaybackOutcome};
use crate::segmenter::{SegmenterSettings, UtteranceSegmenter};
use crate::speech::{SpeechSynthesizer, SpeechTranscriber};
use crate::token::TokenIssuer;
use crate::transport::{InboundAudio, Transport, TransportEvent, TransportHandle};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Listening,
    Speaking,
    /// The closing prompt has been delivered. Still connected, no longer listening.
    Complete,
}

/// Connectivity as seen by the reconnect supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    /// Not connected, and nobody asked to disconnect.
    Dropped,
    /// Disconnected on request.
    Closed,
}

/// What happened to one inbound utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// A speak cycle ran. `audio` is zero when only text could be produced.
    Spoke { utterance: Utterance, audio: Duration },
    /// The audio channel was busy or the session is gone.
    Dropped,
    /// Nothing usable was said.
    Ignored,
    /// The closing prompt has already been delivered.
    Finished,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub url: String,
    pub room: String,
    pub identity: String,
    pub name: String,
    pub voice: String,
    /// Pause after a participant joins before the opening is spoken.
    pub settling_delay: Duration,
    /// Upper bound on every collaborator call and on joining the room.
    pub collaborator_timeout: Duration,
    /// Format of the published agent track.
    pub outbound_format: AudioFormat,
    /// Splits playback into frames of this length; `None` sends each utterance whole.
    pub frame_duration: Option<Duration>,
    pub segmenter: SegmenterSettings,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AgentConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room: config.room_name.clone(),
            identity: config.agent_identity.clone(),
            name: config.agent_name.clone(),
            voice: config.tts_voice.clone(),
            settling_delay: config.settling_delay,
            collaborator_timeout: config.collaborator_timeout,
            outbound_format: AudioFormat::PCM16_24K_MONO,
            frame_duration: Some(Duration::from_millis(20)),
            segmenter: SegmenterSettings::default(),
        }
    }
}

/// The external services a session depends on.
pub struct Collaborators {
    pub generator: ResponseGenerator,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Arc<dyn SpeechTranscriber>,
    pub transport: Arc<dyn Transport>,
    pub tokens: TokenIssuer,
}

/// State of one joined session, shared with its tasks.
struct SessionContext {
    id: u64,
    active: AtomicBool,
    playback: AudioPlaybackScheduler,
}

impl SessionContext {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct ActiveSession {
    context: Arc<SessionContext>,
    handle: Box<dyn TransportHandle>,
    events: JoinHandle<()>,
}

enum SpeakRequest {
    Greeting,
    Reply(String),
}

struct Inner {
    conversation: SharedConversation,
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    session: Mutex<Option<ActiveSession>>,
    phase: watch::Sender<Phase>,
    closed: AtomicBool,
    next_session: AtomicU64,
}

#[derive(Clone)]
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
}

impl TurnOrchestrator {
    pub fn new(
        conversation: SharedConversation,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Disconnected);
        Self {
            inner: Arc::new(Inner {
                conversation,
                collaborators,
                settings,
                session: Mutex::new(None),
                phase,
                closed: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn conversation(&self) -> &SharedConversation {
        &self.inner.conversation
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    pub async fn history(&self) -> Vec<Turn> {
        self.inner.conversation.lock().await.history()
    }

    /// Rewinds the interview to the opening prompt. The connection is kept.
    ///
    /// Waits for any turn in progress so its exchange is not recorded into
    /// the fresh transcript.
    pub async fn reset(&self) {
        let _turn = begin_turn(&self.inner.conversation).await;
        self.inner.conversation.lock().await.reset();
        if self.phase() == Phase::Complete {
            self.inner.phase.send_replace(Phase::Listening);
        }
        info!(room = %self.inner.settings.room, "Conversation reset");
    }

    /// Produces the next utterance without speaking it.
    pub async fn generate_next(&self, user_input: &str) -> Utterance {
        self.inner
            .collaborators
            .generator
            .generate(&self.inner.conversation, user_input)
            .await
    }

    /// Joins the room and starts handling its events.
    ///
    /// Does nothing if a live session already exists. A stale session is torn
    /// down first. Failures leave the orchestrator disconnected.
    #[instrument(name = "connect", skip_all, fields(room = %self.inner.settings.room))]
    pub async fn connect(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        let mut slot = inner.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|active| active.handle.is_connected())
        {
            debug!("Already connected");
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            // Logged by teardown.
            let _ = inner.teardown(stale).await;
        }

        inner.closed.store(false, Ordering::SeqCst);
        inner.phase.send_replace(Phase::Connecting);

        let connection = match inner.open().await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "Failed to connect");
                inner.phase.send_replace(Phase::Disconnected);
                return Err(e);
            }
        };

        let mut playback = AudioPlaybackScheduler::new(connection.sink)
            .with_send_timeout(inner.settings.collaborator_timeout);
        if let Some(frame) = inner.settings.frame_duration {
            playback = playback.with_frame_duration(frame);
        }
        let context = Arc::new(SessionContext {
            id: inner.next_session.fetch_add(1, Ordering::SeqCst),
            active: AtomicBool::new(true),
            playback,
        });

        let span = info_span!(
            "interview_session",
            room = %inner.settings.room,
            session = context.id
        );
        let events = tokio::spawn(
            inner
                .clone()
                .run_events(context.clone(), connection.events)
                .instrument(span),
        );

        *slot = Some(ActiveSession {
            context,
            handle: connection.handle,
            events,
        });
        inner.phase.send_replace(inner.resting_phase().await);
        info!("Connected, waiting for a participant");
        Ok(())
    }

    /// Tears down the session, if any. Safe to call repeatedly.
    ///
    /// In-flight work is cancelled and the audio channel is released whatever
    /// state the session was in.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let active = self.inner.session.lock().await.take();
        let result = match active {
            Some(active) => self.inner.teardown(active).await,
            None => Ok(()),
        };
        self.inner.conversation.lock().await.release_speaking();
        self.inner.phase.send_replace(Phase::Disconnected);
        result
    }

    pub async fn link_status(&self) -> LinkStatus {
        if self.inner.closed.load(Ordering::SeqCst) {
            return LinkStatus::Closed;
        }
        match self.inner.session.lock().await.as_ref() {
            Some(active) if active.handle.is_connected() => LinkStatus::Connected,
            _ => LinkStatus::Dropped,
        }
    }

    /// Feeds one recognised utterance into the session.
    pub async fn on_transcript(&self, text: &str) -> TurnOutcome {
        let context = self
            .inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|active| active.context.clone());
        match context {
            Some(context) => self.inner.handle_transcript(&context, text).await,
            None => TurnOutcome::Dropped,
        }
    }
}

impl Inner {
    async fn open(&self) -> Result<crate::transport::Connection, TransportError> {
        let settings = &self.settings;
        let grant = self.collaborators.tokens.grant(
            &settings.url,
            &settings.room,
            &settings.identity,
            &settings.name,
        )?;
        tokio::time::timeout(
            settings.collaborator_timeout,
            self.collaborators
                .transport
                .connect(&grant, settings.outbound_format),
        )
        .await
        .map_err(|_| TransportError::Timeout(settings.collaborator_timeout))?
    }

    /// What a connected session shows when nothing is being said.
    async fn resting_phase(&self) -> Phase {
        if self.conversation.lock().await.is_complete() {
            Phase::Complete
        } else {
            Phase::Listening
        }
    }

    async fn teardown(&self, active: ActiveSession) -> Result<(), TransportError> {
        active.context.active.store(false, Ordering::SeqCst);
        active.events.abort();
        // Cycles still running on this session hold claims that no longer match.
        self.conversation.lock().await.release_speaking();
        let result = active.handle.disconnect().await;
        if let Err(e) = &result {
            warn!(error = %e, session = active.context.id, "Transport did not disconnect cleanly");
        }
        self.phase.send_replace(Phase::Disconnected);
        info!(session = active.context.id, "Session closed");
        result
    }

    async fn run_events(
        self: Arc<Self>,
        context: Arc<SessionContext>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        let mut children = JoinSet::new();
        let mut greeted = false;

        while let Some(event) = events.recv().await {
            while children.try_join_next().is_some() {}

            match event {
                TransportEvent::ParticipantJoined { identity } => {
                    info!(participant = %identity, "Participant joined");
                    if greeted {
                        debug!("Opening already scheduled for this session");
                        continue;
                    }
                    greeted = true;
                    let inner = self.clone();
                    let context = context.clone();
                    children.spawn(
                        async move {
                            tokio::time::sleep(inner.settings.settling_delay).await;
                            inner.speak(&context, SpeakRequest::Greeting).await;
                        }
                        .in_current_span(),
                    );
                }
                TransportEvent::AudioTrackSubscribed { participant, audio } => {
                    if self.conversation.lock().await.is_complete() {
                        info!(participant = %participant, "Interview complete, not listening");
                        continue;
                    }
                    info!(participant = %participant, "Listening to participant audio");
                    children.spawn(
                        self.clone()
                            .listen(context.clone(), audio)
                            .instrument(info_span!("listen", participant = %participant)),
                    );
                }
                TransportEvent::ParticipantLeft { identity } => {
                    info!(participant = %identity, "Participant left");
                }
                TransportEvent::Disconnected { reason } => {
                    warn!(%reason, "Transport disconnected");
                    break;
                }
            }
        }

        context.active.store(false, Ordering::SeqCst);
        self.phase.send_replace(Phase::Disconnected);
        // In-flight speak cycles finish on their own; they release the channel.
        while children.join_next().await.is_some() {}
    }

    async fn listen(self: Arc<Self>, context: Arc<SessionContext>, mut audio: InboundAudio) {
        let mut segmenter = UtteranceSegmenter::new(audio.format, self.settings.segmenter.clone());
        let mut turns = JoinSet::new();

        loop {
            while turns.try_join_next().is_some() {}

            let (utterance, ended) = match audio.frames.recv().await {
                Some(block) => match segmenter.push(&block) {
                    Some(utterance) => (utterance, false),
                    None => continue,
                },
                None => match segmenter.flush() {
                    Some(utterance) => (utterance, true),
                    None => break,
                },
            };

            {
                let state = self.conversation.lock().await;
                if state.is_complete() {
                    info!("Interview complete, no longer listening");
                    break;
                }
                if state.is_speaking() {
                    debug!("Agent is speaking, dropping utterance");
                    if ended {
                        break;
                    }
                    continue;
                }
            }
            self.spawn_turn(&mut turns, &context, utterance, audio.format);
            if ended {
                break;
            }
        }

        while turns.join_next().await.is_some() {}
        debug!("Inbound audio track ended");
    }

    fn spawn_turn(
        self: &Arc<Self>,
        turns: &mut JoinSet<TurnOutcome>,
        context: &Arc<SessionContext>,
        pcm: Bytes,
        format: AudioFormat,
    ) {
        let inner = self.clone();
        let context = context.clone();
        turns.spawn(
            async move {
                match inner.transcribe(pcm, format).await {
                    Ok(text) => inner.handle_transcript(&context, &text).await,
                    Err(e) => {
                        warn!(error = %e, "Transcription failed, treating as no input");
                        TurnOutcome::Ignored
                    }
                }
            }
            .in_current_span(),
        );
    }

    async fn transcribe(&self, pcm: Bytes, format: AudioFormat) -> Result<String, TranscriptionError> {
        let timeout = self.settings.collaborator_timeout;
        tokio::time::timeout(
            timeout,
            self.collaborators.transcriber.transcribe(pcm, format),
        )
        .await
        .unwrap_or(Err(TranscriptionError::Timeout(timeout)))
    }

    async fn handle_transcript(&self, context: &SessionContext, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!("Empty transcript, agenda not advanced");
            return TurnOutcome::Ignored;
        }
        info!(candidate = %text, "Candidate said");
        self.speak(context, SpeakRequest::Reply(text.to_string()))
            .await
    }

    /// One speak cycle. Claims the audio channel or returns `Dropped`.
    async fn speak(&self, context: &SessionContext, request: SpeakRequest) -> TurnOutcome {
        let (claim, reprompt) = {
            let mut state = self.conversation.lock().await;
            if matches!(request, SpeakRequest::Reply(_)) && state.is_complete() {
                return TurnOutcome::Finished;
            }
            if !context.is_active() {
                debug!("Session closed, dropping turn");
                return TurnOutcome::Dropped;
            }
            let Some(claim) = state.try_begin_speaking() else {
                debug!("Audio channel busy, dropping turn");
                return TurnOutcome::Dropped;
            };
            let reprompt = match request {
                // Rejoining mid-interview repeats the pending question
                // instead of starting over.
                SpeakRequest::Greeting if state.position() > 0 => Some(
                    state
                        .last_interviewer_turn()
                        .or_else(|| state.agenda().get(state.position() - 1))
                        .unwrap_or_default()
                        .to_string(),
                ),
                _ => None,
            };
            (claim, reprompt)
        };
        self.phase.send_replace(Phase::Speaking);

        let generator = &self.collaborators.generator;
        let utterance = match (reprompt, request) {
            (Some(text), _) => {
                info!("Resuming interview with the pending question");
                Utterance {
                    text,
                    source: UtteranceSource::Scripted,
                }
            }
            (None, SpeakRequest::Greeting) => generator.generate(&self.conversation, "").await,
            (None, SpeakRequest::Reply(text)) => {
                generator.generate(&self.conversation, &text).await
            }
        };

        let audio = self.deliver(context, &utterance.text).await;

        let (released, complete) = {
            let mut state = self.conversation.lock().await;
            (state.finish_speaking(claim), state.is_complete())
        };
        if !released {
            debug!("Audio channel was already released by teardown");
        } else if context.is_active() {
            let phase = if complete {
                info!("Closing prompt delivered, interview complete");
                Phase::Complete
            } else {
                Phase::Listening
            };
            self.phase.send_replace(phase);
        }
        TurnOutcome::Spoke { utterance, audio }
    }

    /// Synthesizes and plays `text`, waiting out its duration. Returns the
    /// audio length, or zero when the line could only be logged.
    async fn deliver(&self, context: &SessionContext, text: &str) -> Duration {
        let timeout = self.settings.collaborator_timeout;
        let synthesized = tokio::time::timeout(
            timeout,
            self.collaborators
                .synthesizer
                .synthesize(text, &self.settings.voice),
        )
        .await
        .unwrap_or(Err(SynthesisError::Timeout(timeout)));

        let artifact = match synthesized {
            Ok(artifact) => artifact,
            Err(e) => {
                error!(error = %e, "Speech unavailable");
                info!(interviewer = %text, "Interviewer (text only)");
                return Duration::ZERO;
            }
        };

        info!(interviewer = %text, "Interviewer");
        let outcome = context.playback.play(&artifact.audio, artifact.format).await;
        if let PlaybackOutcome::Failed(e) = &outcome {
            warn!(error = %e, "Playback failed");
        }
        let duration = outcome.duration();
        tokio::time::sleep(duration).await;
        artifact.release();
        duration
    }
}
