//! Deck navigation and the auto-loop state machine.
//!
//! [`StudySession`] owns the deck, the working set of card indices derived
//! from the active category filter, the cursor, and the manual/loop mode.
//! It performs no I/O and never reads the clock itself: the UI layer feeds
//! it key presses, audio completions, and timer polls with an explicit
//! `Instant`, and executes the speech cues it hands back. That keeps every
//! transition, including the timed ones, testable without sleeping.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::models::{Card, CategoryFilter, Deck};

/// Which side of a card a speech cue refers to. Doubles as the phase of an
/// active loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSide {
    Question,
    Answer,
}

impl CardSide {
    pub fn label(self) -> &'static str {
        match self {
            CardSide::Question => "question",
            CardSide::Answer => "answer",
        }
    }
}

/// Wait sub-state of an active loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStage {
    /// Speech for this phase entry is still being synthesized or played.
    AwaitingAudio,
    /// Audio done; holding until the deadline.
    Waiting { until: Instant },
}

/// Session mode. Manual study and the auto-loop are mutually exclusive,
/// and a loop always knows which side it is presenting and whether it is
/// waiting on audio or on the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual { revealed: bool },
    Loop { phase: CardSide, stage: LoopStage },
}

/// Pacing for the auto-loop holds.
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    /// Pause after the question audio, before the answer is revealed.
    pub thinking: Duration,
    /// Pause after the answer audio, before the next card.
    pub review: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            thinking: Duration::from_secs(8),
            review: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("the deck contains no cards")]
    EmptyDeck,
    #[error("no cards match the current filter")]
    EmptyWorkingSet,
    #[error("not available while the loop is running")]
    Locked,
}

/// Indices into the deck that match `filter`, in deck order.
pub fn build_working_set(deck: &Deck, filter: &CategoryFilter) -> Vec<usize> {
    deck.cards()
        .iter()
        .enumerate()
        .filter(|(_, card)| filter.matches(card))
        .map(|(index, _)| index)
        .collect()
}

#[derive(Debug)]
pub struct StudySession {
    deck: Deck,
    filter: CategoryFilter,
    working_set: Vec<usize>,
    cursor: usize,
    mode: Mode,
    timing: LoopTiming,
}

impl StudySession {
    /// A session can start with a filter that matches nothing (the UI shows
    /// a recoverable empty state), but never with an empty deck.
    pub fn new(deck: Deck, filter: CategoryFilter, timing: LoopTiming) -> Result<Self, SessionError> {
        if deck.is_empty() {
            return Err(SessionError::EmptyDeck);
        }
        let working_set = build_working_set(&deck, &filter);
        Ok(Self {
            deck,
            filter,
            working_set,
            cursor: 0,
            mode: Mode::Manual { revealed: false },
            timing,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn filter(&self) -> &CategoryFilter {
        &self.filter
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// True when the current filter matches no cards.
    pub fn is_empty(&self) -> bool {
        self.working_set.is_empty()
    }

    pub fn is_looping(&self) -> bool {
        matches!(self.mode, Mode::Loop { .. })
    }

    /// One-based position and total, for "Card 3 of 12". `None` when the
    /// working set is empty.
    pub fn position(&self) -> Option<(usize, usize)> {
        if self.working_set.is_empty() {
            None
        } else {
            Some((self.cursor + 1, self.working_set.len()))
        }
    }

    pub fn current_card(&self) -> Option<&Card> {
        self.working_set
            .get(self.cursor)
            .and_then(|&index| self.deck.card(index))
    }

    /// Whether the answer side should be on screen: the manual reveal flag,
    /// or the loop presenting its answer phase.
    pub fn answer_visible(&self) -> bool {
        match self.mode {
            Mode::Manual { revealed } => revealed,
            Mode::Loop { phase, .. } => phase == CardSide::Answer,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Manual navigation
    // ═══════════════════════════════════════════════════════════════════

    /// Flip between question and answer. Ignored while looping, where
    /// reveal follows the phase instead.
    pub fn toggle_reveal(&mut self) {
        if self.working_set.is_empty() {
            return;
        }
        if let Mode::Manual { revealed } = self.mode {
            self.mode = Mode::Manual { revealed: !revealed };
        }
    }

    /// Advance to the next card, clamping at the end of the working set.
    /// Moving hides the answer; a clamped press changes nothing.
    pub fn next(&mut self) {
        if !matches!(self.mode, Mode::Manual { .. }) {
            return;
        }
        if self.cursor + 1 < self.working_set.len() {
            self.cursor += 1;
            self.mode = Mode::Manual { revealed: false };
        }
    }

    /// Step back one card, stopping at the first.
    pub fn prev(&mut self) {
        if !matches!(self.mode, Mode::Manual { .. }) {
            return;
        }
        if self.cursor > 0 {
            self.cursor -= 1;
            self.mode = Mode::Manual { revealed: false };
        }
    }

    /// Replace the filter and rebuild the working set from deck order,
    /// resetting cursor and reveal. Re-selecting the active filter is a
    /// no-op so it cannot clobber the position. Refused while looping.
    pub fn set_filter(&mut self, filter: CategoryFilter) -> Result<(), SessionError> {
        if self.is_looping() {
            return Err(SessionError::Locked);
        }
        if filter == self.filter {
            return Ok(());
        }
        self.filter = filter;
        self.working_set = build_working_set(&self.deck, &self.filter);
        self.cursor = 0;
        self.mode = Mode::Manual { revealed: false };
        Ok(())
    }

    /// Shuffle the working set in place and restart from the top. The deck
    /// itself keeps its load order. Refused while looping.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) -> Result<(), SessionError> {
        if self.is_looping() {
            return Err(SessionError::Locked);
        }
        if self.working_set.is_empty() {
            return Ok(());
        }
        self.working_set.shuffle(rng);
        self.cursor = 0;
        self.mode = Mode::Manual { revealed: false };
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Auto-loop
    // ═══════════════════════════════════════════════════════════════════

    /// Enter the loop on the current card. Returns the side to speak;
    /// the caller owns synthesis and must later report how it went via
    /// [`loop_audio_finished`](Self::loop_audio_finished) or
    /// [`loop_speech_failed`](Self::loop_speech_failed).
    pub fn start_loop(&mut self) -> Result<CardSide, SessionError> {
        if self.is_looping() {
            return Err(SessionError::Locked);
        }
        if self.working_set.is_empty() {
            return Err(SessionError::EmptyWorkingSet);
        }
        self.mode = Mode::Loop {
            phase: CardSide::Question,
            stage: LoopStage::AwaitingAudio,
        };
        Ok(CardSide::Question)
    }

    /// Leave the loop and return to manual mode with the answer hidden.
    /// The cursor stays where the loop left it.
    pub fn stop_loop(&mut self) {
        if self.is_looping() {
            self.mode = Mode::Manual { revealed: false };
        }
    }

    /// Audio for the current phase is done (played to completion, or known
    /// to be unplayable); arm the hold timer for this phase.
    pub fn loop_audio_finished(&mut self, now: Instant) {
        if let Mode::Loop {
            phase,
            stage: LoopStage::AwaitingAudio,
        } = self.mode
        {
            let hold = match phase {
                CardSide::Question => self.timing.thinking,
                CardSide::Answer => self.timing.review,
            };
            self.mode = Mode::Loop {
                phase,
                stage: LoopStage::Waiting { until: now + hold },
            };
        }
    }

    /// Speech synthesis for the current phase failed. The loop aborts back
    /// to manual mode on the same card, question side.
    pub fn loop_speech_failed(&mut self) {
        if self.is_looping() {
            self.mode = Mode::Manual { revealed: false };
        }
    }

    /// Drive the loop clock. When a hold deadline has passed, advance to
    /// the next phase and return its speech cue: question hold leads into
    /// the answer, answer hold leads into the next card's question,
    /// wrapping past the end of the working set.
    pub fn poll_loop_timer(&mut self, now: Instant) -> Option<CardSide> {
        let Mode::Loop {
            phase,
            stage: LoopStage::Waiting { until },
        } = self.mode
        else {
            return None;
        };
        if now < until {
            return None;
        }
        let next_phase = match phase {
            CardSide::Question => CardSide::Answer,
            CardSide::Answer => {
                // The working set cannot be emptied while looping, so the
                // modulo is safe.
                self.cursor = (self.cursor + 1) % self.working_set.len();
                CardSide::Question
            }
        };
        self.mode = Mode::Loop {
            phase: next_phase,
            stage: LoopStage::AwaitingAudio,
        };
        Some(next_phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn deck(cards: &[(&str, &str, Option<&str>)]) -> Deck {
        Deck::new(
            cards
                .iter()
                .map(|(q, a, cat)| {
                    let card = Card::new(*q, *a);
                    match cat {
                        Some(c) => card.with_category(*c),
                        None => card,
                    }
                })
                .collect(),
        )
    }

    fn plain_session(n: usize) -> StudySession {
        let cards: Vec<(String, String)> = (0..n)
            .map(|i| (format!("q{i}"), format!("a{i}")))
            .collect();
        let deck = Deck::new(cards.iter().map(|(q, a)| Card::new(q, a)).collect());
        StudySession::new(deck, CategoryFilter::All, LoopTiming::default()).unwrap()
    }

    fn timing(thinking_ms: u64, review_ms: u64) -> LoopTiming {
        LoopTiming {
            thinking: Duration::from_millis(thinking_ms),
            review: Duration::from_millis(review_ms),
        }
    }

    #[test]
    fn empty_deck_is_refused() {
        let err = StudySession::new(Deck::new(vec![]), CategoryFilter::All, LoopTiming::default())
            .unwrap_err();
        assert_eq!(err, SessionError::EmptyDeck);
    }

    #[test]
    fn cursor_stays_in_bounds_under_any_navigation() {
        let mut session = plain_session(4);
        let moves = [
            "next", "next", "prev", "next", "next", "next", "next", "prev", "prev", "prev",
            "prev", "prev", "next",
        ];
        for step in moves {
            match step {
                "next" => session.next(),
                _ => session.prev(),
            }
            let (pos, total) = session.position().unwrap();
            assert!(pos >= 1 && pos <= total);
            assert!(session.current_card().is_some());
        }
    }

    #[test]
    fn next_clamps_at_last_card() {
        let mut session = plain_session(2);
        session.next();
        assert_eq!(session.cursor(), 1);
        session.next();
        assert_eq!(session.cursor(), 1);
    }

    #[test]
    fn prev_stops_at_first_card() {
        let mut session = plain_session(3);
        session.prev();
        assert_eq!(session.cursor(), 0);
        session.next();
        session.prev();
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn moving_hides_the_answer_but_clamped_press_does_not() {
        let mut session = plain_session(2);
        session.toggle_reveal();
        assert!(session.answer_visible());
        session.next();
        assert!(!session.answer_visible());

        session.toggle_reveal();
        session.next(); // already at the last card
        assert!(session.answer_visible());
    }

    #[test]
    fn reveal_toggle_round_trips() {
        let mut session = plain_session(1);
        assert!(!session.answer_visible());
        session.toggle_reveal();
        assert!(session.answer_visible());
        session.toggle_reveal();
        assert!(!session.answer_visible());
    }

    #[test]
    fn filter_selects_matching_cards_in_deck_order() {
        let deck = deck(&[
            ("qa", "aa", Some("X")),
            ("qb", "ab", Some("Y")),
            ("qc", "ac", Some("X")),
        ]);
        assert_eq!(
            build_working_set(&deck, &CategoryFilter::Category("X".into())),
            vec![0, 2]
        );
        assert_eq!(build_working_set(&deck, &CategoryFilter::All), vec![0, 1, 2]);
    }

    #[test]
    fn narrow_filter_then_navigate_clamps_at_its_own_end() {
        let deck = deck(&[
            ("qa", "aa", Some("X")),
            ("qb", "ab", Some("Y")),
            ("qc", "ac", Some("X")),
        ]);
        let mut session =
            StudySession::new(deck, CategoryFilter::All, LoopTiming::default()).unwrap();

        session
            .set_filter(CategoryFilter::Category("X".into()))
            .unwrap();
        assert_eq!(session.position(), Some((1, 2)));
        assert_eq!(session.current_card().unwrap().question, "qa");

        session.next();
        assert_eq!(session.current_card().unwrap().question, "qc");
        session.next();
        assert_eq!(session.current_card().unwrap().question, "qc");
        assert_eq!(session.position(), Some((2, 2)));
    }

    #[test]
    fn filter_matching_nothing_disables_navigation_until_widened() {
        let deck = deck(&[("qa", "aa", Some("X"))]);
        let mut session =
            StudySession::new(deck, CategoryFilter::Category("Z".into()), LoopTiming::default())
                .unwrap();

        assert!(session.is_empty());
        assert_eq!(session.position(), None);
        assert!(session.current_card().is_none());

        session.next();
        session.prev();
        session.toggle_reveal();
        assert_eq!(session.cursor(), 0);
        assert!(!session.answer_visible());
        assert_eq!(session.start_loop().unwrap_err(), SessionError::EmptyWorkingSet);

        session.set_filter(CategoryFilter::All).unwrap();
        assert_eq!(session.position(), Some((1, 1)));
    }

    #[test]
    fn reselecting_the_active_filter_keeps_the_position() {
        let deck = deck(&[("qa", "aa", Some("X")), ("qb", "ab", Some("X"))]);
        let mut session =
            StudySession::new(deck, CategoryFilter::Category("X".into()), LoopTiming::default())
                .unwrap();
        session.next();
        session.set_filter(CategoryFilter::Category("X".into())).unwrap();
        assert_eq!(session.cursor(), 1);
    }

    #[test]
    fn shuffle_permutes_working_set_without_touching_deck() {
        let mut session = plain_session(10);
        let original: Vec<String> = session
            .deck()
            .cards()
            .iter()
            .map(|c| c.question.clone())
            .collect();

        let mut changed = false;
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(seed);
            session.shuffle(&mut rng).unwrap();
            assert_eq!(session.cursor(), 0);

            let mut seen: Vec<usize> = (0..10)
                .map(|_| {
                    let card = session.current_card().unwrap();
                    let index = card.question[1..].parse().unwrap();
                    session.next();
                    index
                })
                .collect();
            if seen != (0..10).collect::<Vec<_>>() {
                changed = true;
            }
            seen.sort_unstable();
            assert_eq!(seen, (0..10).collect::<Vec<_>>());
        }
        assert!(changed, "shuffle never changed the order");

        let after: Vec<String> = session
            .deck()
            .cards()
            .iter()
            .map(|c| c.question.clone())
            .collect();
        assert_eq!(original, after);
    }

    #[test]
    fn loop_walks_question_answer_question_and_wraps() {
        let mut session = plain_session(2);
        let t0 = Instant::now();
        session.next(); // start the loop on the last card to exercise the wrap
        assert_eq!(session.cursor(), 1);

        assert_eq!(session.start_loop().unwrap(), CardSide::Question);
        assert!(!session.answer_visible());

        // Waiting on audio: the clock alone moves nothing.
        assert_eq!(session.poll_loop_timer(t0 + Duration::from_secs(600)), None);

        session.loop_audio_finished(t0);
        let timing = LoopTiming::default();
        assert_eq!(session.poll_loop_timer(t0 + timing.thinking - Duration::from_millis(1)), None);
        assert_eq!(
            session.poll_loop_timer(t0 + timing.thinking),
            Some(CardSide::Answer)
        );
        assert!(session.answer_visible());
        assert_eq!(session.cursor(), 1);

        let t1 = t0 + timing.thinking;
        session.loop_audio_finished(t1);
        assert_eq!(
            session.poll_loop_timer(t1 + timing.review),
            Some(CardSide::Question)
        );
        assert_eq!(session.cursor(), 0, "loop wraps to the first card");
        assert!(!session.answer_visible());
    }

    #[test]
    fn loop_hold_uses_thinking_then_review_durations() {
        let deck = deck(&[("q", "a", None)]);
        let mut session =
            StudySession::new(deck, CategoryFilter::All, timing(300, 100)).unwrap();
        let t0 = Instant::now();

        session.start_loop().unwrap();
        session.loop_audio_finished(t0);
        assert_eq!(session.poll_loop_timer(t0 + Duration::from_millis(100)), None);
        assert_eq!(
            session.poll_loop_timer(t0 + Duration::from_millis(300)),
            Some(CardSide::Answer)
        );

        session.loop_audio_finished(t0);
        assert_eq!(session.poll_loop_timer(t0 + Duration::from_millis(99)), None);
        assert_eq!(
            session.poll_loop_timer(t0 + Duration::from_millis(100)),
            Some(CardSide::Question)
        );
    }

    #[test]
    fn repeated_audio_completions_do_not_extend_the_hold() {
        let mut session = plain_session(1);
        let t0 = Instant::now();
        session.start_loop().unwrap();
        session.loop_audio_finished(t0);
        session.loop_audio_finished(t0 + Duration::from_secs(5));

        let timing = LoopTiming::default();
        assert_eq!(
            session.poll_loop_timer(t0 + timing.thinking),
            Some(CardSide::Answer)
        );
    }

    #[test]
    fn speech_failure_aborts_loop_without_advancing() {
        let mut session = plain_session(3);
        session.next();
        session.start_loop().unwrap();
        session.loop_speech_failed();

        assert_eq!(session.mode(), Mode::Manual { revealed: false });
        assert_eq!(session.cursor(), 1);

        // A late timer poll after the abort must not resurrect the loop.
        assert_eq!(session.poll_loop_timer(Instant::now() + Duration::from_secs(60)), None);
    }

    #[test]
    fn stop_loop_cancels_a_pending_hold() {
        let mut session = plain_session(2);
        let t0 = Instant::now();
        session.start_loop().unwrap();
        session.loop_audio_finished(t0);
        session.stop_loop();

        assert_eq!(session.mode(), Mode::Manual { revealed: false });
        assert_eq!(session.poll_loop_timer(t0 + Duration::from_secs(600)), None);
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn loop_locks_filter_shuffle_and_manual_input() {
        let deck = deck(&[("qa", "aa", Some("X")), ("qb", "ab", Some("Y"))]);
        let mut session =
            StudySession::new(deck, CategoryFilter::All, LoopTiming::default()).unwrap();
        session.start_loop().unwrap();

        assert_eq!(
            session.set_filter(CategoryFilter::Category("X".into())),
            Err(SessionError::Locked)
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(session.shuffle(&mut rng), Err(SessionError::Locked));
        assert_eq!(session.start_loop(), Err(SessionError::Locked));

        session.next();
        session.prev();
        session.toggle_reveal();
        assert_eq!(session.cursor(), 0);
        assert!(session.is_looping());
        assert!(!session.answer_visible());
        assert_eq!(*session.filter(), CategoryFilter::All);
    }

    #[test]
    fn zero_second_holds_fire_on_the_next_poll() {
        let deck = deck(&[("q0", "a0", None), ("q1", "a1", None)]);
        let mut session = StudySession::new(deck, CategoryFilter::All, timing(0, 0)).unwrap();
        let t0 = Instant::now();

        session.start_loop().unwrap();
        session.loop_audio_finished(t0);
        assert_eq!(session.poll_loop_timer(t0), Some(CardSide::Answer));
        session.loop_audio_finished(t0);
        assert_eq!(session.poll_loop_timer(t0), Some(CardSide::Question));
        assert_eq!(session.cursor(), 1);
    }
}
