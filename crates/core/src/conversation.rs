//! Conversation state for one interview session.
//!
//! Holds the position in the agenda, a bounded transcript and the
//! "currently producing audio" flag. All mutation goes through the methods
//! here so the invariants hold no matter who drives the session:
//!
//! - `position` only moves forward (except on [`ConversationState::reset`]) and
//!   never exceeds the agenda length.
//! - The transcript never holds more than `capacity` turns; the oldest
//!   exchange is evicted first.
//! - `speaking` is held by at most one speak cycle at a time, and only the
//!   holder of a [`SpeakingClaim`] can hand it back.
//! - Whole turns (advance, generate, record) run one at a time through the
//!   [`TurnGate`], in the order they asked for it.

use crate::agenda::Agenda;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Number of turns kept when no capacity is configured.
pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 8;

/// Smallest capacity that can still hold one full exchange.
const MIN_TRANSCRIPT_CAPACITY: usize = 2;

/// A conversation shared between the orchestrator, its event tasks and the API.
pub type SharedConversation = Arc<Mutex<ConversationState>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Interviewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Candidate => write!(f, "candidate"),
            Role::Interviewer => write!(f, "interviewer"),
        }
    }
}

/// Proof of holding the audio channel, returned by
/// [`ConversationState::try_begin_speaking`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct SpeakingClaim(u64);

/// Serializes whole turns on one conversation.
pub type TurnGate = Arc<Mutex<()>>;

/// Held while a turn runs. Dropping it lets the next turn in.
pub type TurnPermit = OwnedMutexGuard<()>;

/// One recorded utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// What the agenda calls for next, as returned by [`ConversationState::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The opening prompt, spoken verbatim.
    Opening { prompt: String },
    /// A mid-interview question that may be personalised.
    Question { index: usize, prompt: String },
    /// The closing prompt, spoken verbatim. Repeats without advancing.
    Closing { prompt: String },
}

#[derive(Debug)]
pub struct ConversationState {
    agenda: Agenda,
    position: usize,
    transcript: VecDeque<Turn>,
    capacity: usize,
    speaking: Option<SpeakingClaim>,
    next_claim: u64,
    closed: bool,
    turn_gate: TurnGate,
}

impl ConversationState {
    /// Creates a fresh conversation. Capacities below two are raised to two.
    pub fn new(agenda: Agenda, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_TRANSCRIPT_CAPACITY);
        Self {
            agenda,
            position: 0,
            transcript: VecDeque::with_capacity(capacity + 1),
            capacity,
            speaking: None,
            next_claim: 1,
            closed: false,
            turn_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn shared(agenda: Agenda, capacity: usize) -> SharedConversation {
        Arc::new(Mutex::new(Self::new(agenda, capacity)))
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    /// Index of the next agenda prompt to be asked.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once the closing prompt has been handed out.
    pub fn is_complete(&self) -> bool {
        self.closed
    }

    /// Moves the agenda forward by one prompt and reports which prompt is due.
    ///
    /// The closing prompt is returned on every call once reached, without
    /// moving `position` past it.
    pub fn advance(&mut self) -> Step {
        let last = self.agenda.last_index();
        if self.position == 0 {
            self.position = 1;
            if last == 0 {
                self.closed = true;
            }
            Step::Opening {
                prompt: self.agenda.opening().to_string(),
            }
        } else if self.position < last {
            let index = self.position;
            self.position += 1;
            Step::Question {
                index,
                prompt: self.agenda.get(index).unwrap_or_default().to_string(),
            }
        } else {
            self.closed = true;
            Step::Closing {
                prompt: self.agenda.closing().to_string(),
            }
        }
    }

    /// Appends a turn unless `text` is blank. Returns whether a turn was added.
    pub fn record(&mut self, role: Role, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.transcript.push_back(Turn {
            role,
            text: text.to_string(),
        });
        self.evict();
        true
    }

    // Drops the oldest turns until the bound holds. A candidate turn takes the
    // interviewer reply that follows it along, so no reply is left orphaned.
    fn evict(&mut self) {
        while self.transcript.len() > self.capacity {
            let Some(evicted) = self.transcript.pop_front() else {
                break;
            };
            let orphaned_reply = evicted.role == Role::Candidate
                && self
                    .transcript
                    .front()
                    .is_some_and(|next| next.role == Role::Interviewer);
            if orphaned_reply {
                self.transcript.pop_front();
            }
        }
    }

    /// Rewinds to the opening prompt and clears the transcript.
    pub fn reset(&mut self) {
        self.position = 0;
        self.closed = false;
        self.transcript.clear();
    }

    pub fn history(&self) -> Vec<Turn> {
        self.transcript.iter().cloned().collect()
    }

    pub fn transcript_len(&self) -> usize {
        self.transcript.len()
    }

    pub fn last_interviewer_turn(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|turn| turn.role == Role::Interviewer)
            .map(|turn| turn.text.as_str())
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    /// Claims the audio channel. Returns `None` if a speak cycle already holds it.
    pub fn try_begin_speaking(&mut self) -> Option<SpeakingClaim> {
        if self.speaking.is_some() {
            return None;
        }
        let claim = SpeakingClaim(self.next_claim);
        self.next_claim += 1;
        self.speaking = Some(claim);
        Some(claim)
    }

    /// Hands the audio channel back. A claim that was already released, or
    /// superseded by a newer one, leaves the channel alone and returns false.
    pub fn finish_speaking(&mut self, claim: SpeakingClaim) -> bool {
        if self.speaking == Some(claim) {
            self.speaking = None;
            true
        } else {
            false
        }
    }

    /// Releases the audio channel whoever holds it. Used on teardown.
    pub fn release_speaking(&mut self) {
        self.speaking = None;
    }

    /// The gate every turn on this conversation passes through.
    pub fn turn_gate(&self) -> TurnGate {
        self.turn_gate.clone()
    }
}

/// Waits for this conversation's turn gate.
///
/// The state lock is only held long enough to clone the gate, so other
/// readers are not blocked while a turn is in progress.
pub async fn begin_turn(conversation: &SharedConversation) -> TurnPermit {
    let gate = conversation.lock().await.turn_gate();
    gate.lock_owned().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_prompts() -> Agenda {
        Agenda::new(["Q0", "Q1", "Q2(last)"]).unwrap()
    }

    #[test]
    fn test_advance_walks_the_agenda_and_repeats_closing() {
        let mut state = ConversationState::new(three_prompts(), 8);

        assert_eq!(
            state.advance(),
            Step::Opening {
                prompt: "Q0".into()
            }
        );
        assert_eq!(state.position(), 1);
        assert_eq!(
            state.advance(),
            Step::Question {
                index: 1,
                prompt: "Q1".into()
            }
        );
        assert_eq!(state.position(), 2);
        assert!(!state.is_complete());

        for _ in 0..5 {
            assert_eq!(
                state.advance(),
                Step::Closing {
                    prompt: "Q2(last)".into()
                }
            );
            assert_eq!(state.position(), 2);
        }
        assert!(state.is_complete());
    }

    #[test]
    fn test_position_never_exceeds_agenda_length() {
        let mut state = ConversationState::new(Agenda::new(["Only"]).unwrap(), 8);
        let mut last = 0;
        for _ in 0..10 {
            state.advance();
            assert!(state.position() >= last);
            assert!(state.position() <= state.agenda().len());
            last = state.position();
        }
        assert!(state.is_complete());
    }

    #[test]
    fn test_record_ignores_blank_text() {
        let mut state = ConversationState::new(three_prompts(), 8);
        assert!(!state.record(Role::Candidate, "   \n"));
        assert!(state.record(Role::Candidate, "  an answer "));
        assert_eq!(
            state.history(),
            vec![Turn {
                role: Role::Candidate,
                text: "an answer".into()
            }]
        );
    }

    #[test]
    fn test_transcript_is_bounded_and_keeps_latest_exchange() {
        let mut state = ConversationState::new(three_prompts(), 8);
        state.record(Role::Interviewer, "opening");
        for i in 0..10 {
            state.record(Role::Candidate, &format!("answer {i}"));
            state.record(Role::Interviewer, &format!("question {i}"));
            assert!(state.transcript_len() <= 8);
        }

        let history = state.history();
        let tail = &history[history.len() - 2..];
        assert_eq!(tail[0].text, "answer 9");
        assert_eq!(tail[1].text, "question 9");
        assert_eq!(history[0].role, Role::Candidate);
    }

    #[test]
    fn test_eviction_drops_whole_exchanges() {
        let mut state = ConversationState::new(three_prompts(), 3);
        state.record(Role::Candidate, "a1");
        state.record(Role::Interviewer, "q1");
        state.record(Role::Candidate, "a2");
        state.record(Role::Interviewer, "q2");

        let texts: Vec<_> = state.history().into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["a2", "q2"]);
    }

    #[test]
    fn test_capacity_floor() {
        let state = ConversationState::new(three_prompts(), 0);
        assert_eq!(state.capacity(), 2);
    }

    #[test]
    fn test_reset_rewinds_position_and_clears_transcript() {
        let mut state = ConversationState::new(three_prompts(), 8);
        state.advance();
        state.advance();
        for i in 0..5 {
            state.record(Role::Candidate, &format!("turn {i}"));
        }
        assert_eq!(state.position(), 2);

        state.reset();
        assert_eq!(state.position(), 0);
        assert_eq!(state.transcript_len(), 0);
        assert!(!state.is_complete());
    }

    #[test]
    fn test_speaking_flag_is_exclusive() {
        let mut state = ConversationState::new(three_prompts(), 8);
        let claim = state.try_begin_speaking().unwrap();
        assert!(state.try_begin_speaking().is_none());
        assert!(state.finish_speaking(claim));
        assert!(!state.is_speaking());
        assert!(state.try_begin_speaking().is_some());
    }

    #[test]
    fn test_released_claim_cannot_clear_a_newer_one() {
        let mut state = ConversationState::new(three_prompts(), 8);
        let stale = state.try_begin_speaking().unwrap();
        state.release_speaking();
        let current = state.try_begin_speaking().unwrap();
        assert_ne!(stale, current);

        assert!(!state.finish_speaking(stale));
        assert!(state.is_speaking());
        assert!(state.try_begin_speaking().is_none());

        assert!(state.finish_speaking(current));
        assert!(!state.is_speaking());
    }

    #[tokio::test]
    async fn test_turn_gate_admits_one_turn_at_a_time() {
        let conversation = ConversationState::shared(three_prompts(), 8);
        let first = begin_turn(&conversation).await;
        let gate = conversation.lock().await.turn_gate();
        assert!(gate.try_lock().is_err());
        // The state itself stays readable while a turn is held.
        assert_eq!(conversation.lock().await.position(), 0);
        drop(first);
        assert!(gate.try_lock().is_ok());
    }

    #[test]
    fn test_last_interviewer_turn() {
        let mut state = ConversationState::new(three_prompts(), 8);
        assert_eq!(state.last_interviewer_turn(), None);
        state.record(Role::Interviewer, "Q0");
        state.record(Role::Candidate, "answer");
        assert_eq!(state.last_interviewer_turn(), Some("Q0"));
    }
}
