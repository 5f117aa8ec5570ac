use async_trait::async_trait;
use bytes::Bytes;
use interview_core::audio::{self, AudioFormat};
use interview_core::error::{GenerationError, SynthesisError, TranscriptionError};
use interview_core::llm_client::TextGenerator;
use interview_core::segmenter::SegmenterSettings;
use interview_core::speech::{SpeechArtifact, SpeechSynthesizer, SpeechTranscriber};
use interview_core::token::TokenIssuer;
use interview_core::transport::loopback::LoopbackTransport;
use interview_core::{
    Agenda, Collaborators, ConversationState, GeneratorSettings, LinkStatus,
    OrchestratorSettings, Phase, ReconnectPolicy, ResponseGenerator, Role, SessionEntry,
    SessionRegistry, TurnOrchestrator, TurnOutcome, UtteranceSource, supervise,
};
use secrecy::SecretString;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

struct OfflineLlm;

#[async_trait]
impl TextGenerator for OfflineLlm {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Request("offline".into()))
    }
}

/// Returns 100 ms of silence per utterance. When gated, each call waits
/// for a permit first.
struct FakeSynthesizer {
    calls: AtomicUsize,
    spoken: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl FakeSynthesizer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            spoken: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<SpeechArtifact, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(SpeechArtifact {
            audio: Bytes::from(vec![0u8; 4_800]),
            format: AudioFormat::PCM16_24K_MONO,
            text: text.to_string(),
        })
    }
}

#[derive(Default)]
struct FakeTranscriber {
    replies: Mutex<VecDeque<String>>,
    received: Mutex<Vec<usize>>,
}

impl FakeTranscriber {
    fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            received: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechTranscriber for FakeTranscriber {
    async fn transcribe(
        &self,
        pcm: Bytes,
        _format: AudioFormat,
    ) -> Result<String, TranscriptionError> {
        self.received.lock().unwrap().push(pcm.len());
        Ok(self.replies.lock().unwrap().pop_front().unwrap_or_default())
    }
}

struct Harness {
    orchestrator: TurnOrchestrator,
    transport: LoopbackTransport,
    synthesizer: Arc<FakeSynthesizer>,
    transcriber: Arc<FakeTranscriber>,
}

fn harness(synthesizer: FakeSynthesizer, transcriber: FakeTranscriber) -> Harness {
    let transport = LoopbackTransport::new();
    let synthesizer = Arc::new(synthesizer);
    let transcriber = Arc::new(transcriber);
    let conversation = ConversationState::shared(Agenda::new(["Q0", "Q1", "Q2(last)"]).unwrap(), 8);
    let orchestrator = TurnOrchestrator::new(
        conversation,
        Collaborators {
            generator: ResponseGenerator::new(Arc::new(OfflineLlm), GeneratorSettings::default()),
            synthesizer: synthesizer.clone(),
            transcriber: transcriber.clone(),
            transport: Arc::new(transport.clone()),
            tokens: TokenIssuer::new("devkey", SecretString::from("devsecret-devsecret")),
        },
        OrchestratorSettings {
            url: "loopback://".into(),
            room: "voice-interview-room".into(),
            identity: "interview-agent".into(),
            name: "Interview Agent".into(),
            voice: "alloy".into(),
            settling_delay: Duration::from_millis(200),
            collaborator_timeout: Duration::from_secs(5),
            outbound_format: AudioFormat::PCM16_24K_MONO,
            frame_duration: Some(Duration::from_millis(20)),
            segmenter: SegmenterSettings::default(),
        },
    );
    Harness {
        orchestrator,
        transport,
        synthesizer,
        transcriber,
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn position(orchestrator: &TurnOrchestrator) -> usize {
    orchestrator.conversation().lock().await.position()
}

fn tone_frame() -> Vec<u8> {
    let samples: Vec<i16> = (0..480)
        .map(|i| if i % 2 == 0 { 9000 } else { -9000 })
        .collect();
    audio::pcm16_to_bytes(&samples)
}

#[tokio::test(start_paused = true)]
async fn opening_is_spoken_once_after_participant_joins() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();
    assert_eq!(h.orchestrator.phase(), Phase::Listening);

    assert!(h.transport.join_participant("candidate").await);
    assert!(h.transport.join_participant("candidate").await);

    eventually("opening", || async { h.synthesizer.calls() == 1 }).await;
    eventually("channel released", || async {
        !h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.synthesizer.spoken(), vec!["Q0".to_string()]);
    assert_eq!(position(&h.orchestrator).await, 1);
    // 100 ms of audio in 20 ms frames
    assert_eq!(h.transport.delivered_frames(), 5);
    assert_eq!(h.transport.delivered_bytes(), 4_800);
}

#[tokio::test(start_paused = true)]
async fn second_transcript_while_speaking_is_dropped() {
    let h = harness(FakeSynthesizer::gated(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.on_transcript("first answer").await })
    };
    eventually("first cycle holding the channel", || async {
        h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;
    assert_eq!(h.orchestrator.phase(), Phase::Speaking);

    let second = h.orchestrator.on_transcript("second answer").await;
    assert_eq!(second, TurnOutcome::Dropped);

    h.synthesizer.release(1);
    let first = first.await.unwrap();
    assert!(matches!(first, TurnOutcome::Spoke { .. }));

    assert_eq!(h.synthesizer.calls(), 1);
    let history = h.orchestrator.history().await;
    let texts: Vec<(Role, String)> = history.into_iter().map(|t| (t.role, t.text)).collect();
    assert_eq!(
        texts,
        vec![
            (Role::Candidate, "first answer".to_string()),
            (Role::Interviewer, "Q0".to_string()),
        ]
    );
    assert!(!h.orchestrator.conversation().lock().await.is_speaking());
    assert_eq!(h.orchestrator.phase(), Phase::Listening);
}

#[tokio::test(start_paused = true)]
async fn failed_generation_still_speaks_the_scripted_question() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();

    h.orchestrator.on_transcript("hello").await;
    let outcome = h.orchestrator.on_transcript("I have built several APIs").await;

    match outcome {
        TurnOutcome::Spoke { utterance, audio } => {
            assert_eq!(utterance.source, UtteranceSource::Fallback);
            assert!(utterance.text.contains("Q1"));
            assert_eq!(audio, Duration::from_millis(100));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!h.orchestrator.conversation().lock().await.is_speaking());
    assert_eq!(position(&h.orchestrator).await, 2);
}

#[tokio::test(start_paused = true)]
async fn inbound_audio_is_segmented_transcribed_and_answered() {
    let h = harness(
        FakeSynthesizer::new(),
        FakeTranscriber::replying(&["I design REST APIs every day"]),
    );
    h.orchestrator.connect().await.unwrap();
    h.transport.join_participant("candidate").await;
    eventually("opening", || async {
        position(&h.orchestrator).await == 1
            && !h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;

    let track = h
        .transport
        .open_audio_track("candidate", AudioFormat::PCM16_48K_MONO)
        .await
        .unwrap();
    for _ in 0..50 {
        track.send(Bytes::from(tone_frame())).await.unwrap();
    }
    for _ in 0..80 {
        track.send(Bytes::from(vec![0u8; 960])).await.unwrap();
    }

    eventually("reply", || async { position(&h.orchestrator).await == 2 }).await;
    eventually("reply spoken", || async { h.synthesizer.calls() == 2 }).await;

    assert_eq!(h.transcriber.received.lock().unwrap().len(), 1);
    let history = h.orchestrator.history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].role, Role::Candidate);
    assert_eq!(history[1].text, "I design REST APIs every day");
    assert_eq!(history[2].text, "That's interesting. Q1");
}

#[tokio::test(start_paused = true)]
async fn empty_transcription_does_not_advance() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::replying(&[""]));
    h.orchestrator.connect().await.unwrap();

    let track = h
        .transport
        .open_audio_track("candidate", AudioFormat::PCM16_48K_MONO)
        .await
        .unwrap();
    for _ in 0..40 {
        track.send(Bytes::from(tone_frame())).await.unwrap();
    }
    drop(track);

    eventually("transcription", || async {
        !h.transcriber.received.lock().unwrap().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(position(&h.orchestrator).await, 0);
    assert!(h.orchestrator.history().await.is_empty());
    assert_eq!(h.synthesizer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn completed_interview_stops_answering() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();

    h.orchestrator.on_transcript("hi").await;
    h.orchestrator.on_transcript("answer one").await;
    let closing = h.orchestrator.on_transcript("answer two").await;
    assert!(matches!(
        closing,
        TurnOutcome::Spoke { ref utterance, .. } if utterance.text == "Q2(last)"
    ));
    assert!(h.orchestrator.conversation().lock().await.is_complete());
    assert_eq!(h.orchestrator.phase(), Phase::Complete);

    assert_eq!(
        h.orchestrator.on_transcript("one more thing").await,
        TurnOutcome::Finished
    );
    assert_eq!(position(&h.orchestrator).await, 2);
    assert_eq!(h.synthesizer.calls(), 3);
    assert_eq!(h.orchestrator.phase(), Phase::Complete);

    h.orchestrator.reset().await;
    assert_eq!(h.orchestrator.phase(), Phase::Listening);
}

#[tokio::test(start_paused = true)]
async fn rejoin_after_drop_resumes_instead_of_restarting() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();
    h.orchestrator.on_transcript("hi").await;
    h.orchestrator.on_transcript("my answer").await;
    let history_before = h.orchestrator.history().await;
    assert_eq!(position(&h.orchestrator).await, 2);

    h.transport.drop_connection("network blip").await;
    eventually("drop noticed", || async {
        h.orchestrator.link_status().await == LinkStatus::Dropped
    })
    .await;

    h.orchestrator.connect().await.unwrap();
    assert_eq!(h.transport.connect_count(), 2);
    h.transport.join_participant("candidate").await;
    eventually("re-prompt", || async { h.synthesizer.calls() == 3 }).await;

    let spoken = h.synthesizer.spoken();
    assert_eq!(spoken[2], "That's interesting. Q1");
    assert_eq!(position(&h.orchestrator).await, 2);
    eventually("channel released", || async {
        !h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;
    assert_eq!(h.orchestrator.history().await, history_before);
}

#[tokio::test(start_paused = true)]
async fn cycle_outliving_its_session_does_not_release_the_next_claim() {
    let h = harness(FakeSynthesizer::gated(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();

    let stale = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.on_transcript("first").await })
    };
    eventually("first cycle holding the channel", || async {
        h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;

    h.transport.drop_connection("network blip").await;
    eventually("drop noticed", || async {
        h.orchestrator.link_status().await == LinkStatus::Dropped
    })
    .await;
    h.orchestrator.connect().await.unwrap();
    assert!(!h.orchestrator.conversation().lock().await.is_speaking());

    let current = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.on_transcript("second").await })
    };
    eventually("second cycle holding the channel", || async {
        h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;

    // The first cycle is queued on the synthesizer ahead of the second.
    h.synthesizer.release(1);
    assert!(matches!(stale.await.unwrap(), TurnOutcome::Spoke { .. }));

    assert!(h.orchestrator.conversation().lock().await.is_speaking());
    assert_eq!(h.orchestrator.phase(), Phase::Speaking);
    assert_eq!(
        h.orchestrator.on_transcript("third").await,
        TurnOutcome::Dropped
    );

    h.synthesizer.release(1);
    assert!(matches!(current.await.unwrap(), TurnOutcome::Spoke { .. }));
    assert!(!h.orchestrator.conversation().lock().await.is_speaking());
    assert_eq!(h.orchestrator.phase(), Phase::Listening);
    assert_eq!(h.synthesizer.calls(), 2);

    let texts: Vec<String> = h
        .orchestrator
        .history()
        .await
        .into_iter()
        .map(|t| t.text)
        .collect();
    assert_eq!(texts, ["first", "Q0", "second", "That's interesting. Q1"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_speaking_releases_the_channel() {
    let h = harness(FakeSynthesizer::gated(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();
    h.transport.join_participant("candidate").await;
    eventually("opening in flight", || async {
        h.orchestrator.conversation().lock().await.is_speaking()
    })
    .await;

    h.orchestrator.disconnect().await.unwrap();

    assert!(!h.orchestrator.conversation().lock().await.is_speaking());
    assert_eq!(h.orchestrator.phase(), Phase::Disconnected);
    assert_eq!(h.orchestrator.link_status().await, LinkStatus::Closed);
    assert!(!h.transport.is_connected());
    h.synthesizer.release(1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport.delivered_frames(), 0);
}

#[tokio::test(start_paused = true)]
async fn supervisor_reconnects_until_closed() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.orchestrator.connect().await.unwrap();
    let policy = ReconnectPolicy {
        interval: Duration::from_secs(1),
        max_attempts: Some(5),
    };
    let supervisor = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { supervise(&orchestrator, policy).await })
    };

    h.transport.fail_next_connects(2);
    h.transport.drop_connection("server restart").await;
    eventually("reconnect", || async { h.transport.connect_count() == 2 }).await;
    assert!(h.transport.is_connected());

    h.orchestrator.disconnect().await.unwrap();
    assert!(supervisor.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn supervisor_gives_up_after_max_attempts() {
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());
    h.transport.fail_next_connects(10);
    let policy = ReconnectPolicy {
        interval: Duration::from_secs(1),
        max_attempts: Some(3),
    };

    let result = supervise(&h.orchestrator, policy).await;

    assert!(result.is_err());
    assert_eq!(h.transport.connect_count(), 0);
    assert_eq!(h.orchestrator.phase(), Phase::Disconnected);
}

#[tokio::test]
async fn registry_tracks_sessions_by_room() {
    let registry = SessionRegistry::new();
    let h = harness(FakeSynthesizer::new(), FakeTranscriber::default());

    assert!(
        registry
            .insert(
                "room-a",
                SessionEntry {
                    orchestrator: h.orchestrator.clone(),
                    supervisor: None,
                },
            )
            .await
    );
    assert!(
        !registry
            .insert(
                "room-a",
                SessionEntry {
                    orchestrator: h.orchestrator.clone(),
                    supervisor: None,
                },
            )
            .await
    );
    assert!(registry.get("room-a").await.is_some());
    assert!(registry.get("room-b").await.is_none());
    assert_eq!(registry.rooms().await, vec!["room-a".to_string()]);

    assert!(registry.remove("room-a").await.is_some());
    assert!(registry.is_empty().await);
}
