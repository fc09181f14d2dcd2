//! Main application state and logic.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph},
    Frame,
};
use tracing::{debug, info, warn};

use super::theme::{icons, Theme};
use super::widgets::{CardPanel, DeckStatusBar, EmptyFilterNotice, KeyHints};
use crate::config::Config;
use crate::models::{CategoryFilter, Deck};
use crate::player::AudioPlayer;
use crate::session::{CardSide, Mode, SessionError, StudySession};
use crate::speech::{self, SpeechOutcome, Synthesizer, VOICES};

// ══════════════════════════════════════════════════════════════════════════
// Application State
// ══════════════════════════════════════════════════════════════════════════

/// What an in-flight synthesis request is for. Loop requests feed the
/// state machine; manual requests just play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeechPurpose {
    Manual,
    Loop,
}

struct PendingSpeech {
    seq: u64,
    purpose: SpeechPurpose,
}

/// Coloring for the transient status line.
#[derive(Debug, Clone, Copy)]
enum StatusKind {
    Info,
    Warn,
    Error,
}

pub struct App {
    pub running: bool,

    // Config and theme
    pub config: Config,
    pub theme: Theme,

    // Study state
    session: StudySession,
    deck_title: String,

    // Speech pipeline
    synthesizer: Option<Synthesizer>,
    speech_tx: Sender<SpeechOutcome>,
    speech_rx: Receiver<SpeechOutcome>,
    speech_seq: u64,
    pending_speech: Option<PendingSpeech>,
    player: AudioPlayer,

    // Status message (shown temporarily)
    status_message: Option<(String, StatusKind, Instant)>,
}

impl App {
    pub fn new(
        deck: Deck,
        filter: CategoryFilter,
        config: Config,
        deck_title: String,
    ) -> Result<Self, SessionError> {
        let theme = Theme::from_name(&config.theme);
        let session = StudySession::new(deck, filter, config.study.timing())?;

        let synthesizer = match config.speech.resolve_api_key() {
            Some(key) => match Synthesizer::new(&key, &config.speech.options()) {
                Ok(synthesizer) => Some(synthesizer),
                Err(err) => {
                    warn!(%err, "speech synthesis disabled");
                    None
                }
            },
            None => {
                info!("no API key configured, speech synthesis disabled");
                None
            }
        };

        let (speech_tx, speech_rx) = mpsc::channel();

        let mut app = Self {
            running: true,
            config,
            theme,
            session,
            deck_title,
            synthesizer,
            speech_tx,
            speech_rx,
            speech_seq: 0,
            pending_speech: None,
            player: AudioPlayer::new(),
            status_message: None,
        };
        app.check_voices();
        Ok(app)
    }

    /// An unknown voice name would only surface as an API error mid-study,
    /// so fall back to the defaults at startup.
    fn check_voices(&mut self) {
        if !VOICES.contains(&self.config.speech.voice_question.as_str()) {
            warn!(voice = %self.config.speech.voice_question, "unknown question voice, using alloy");
            self.config.speech.voice_question = "alloy".to_string();
        }
        if !VOICES.contains(&self.config.speech.voice_answer.as_str()) {
            warn!(voice = %self.config.speech.voice_answer, "unknown answer voice, using nova");
            self.config.speech.voice_answer = "nova".to_string();
        }
    }

    pub fn cycle_theme(&mut self) {
        let new_theme_name = self.theme.name.next();
        self.theme = Theme::new(new_theme_name);
        self.config.theme = new_theme_name.as_str().to_string();
        let _ = self.config.save();
    }

    fn set_status(&mut self, message: impl Into<String>, kind: StatusKind) {
        self.status_message = Some((message.into(), kind, Instant::now()));
    }

    fn next_card(&mut self) {
        if self.session.is_looping() {
            return;
        }
        let before = self.session.cursor();
        self.session.next();
        if self.session.cursor() != before {
            self.cancel_audio();
        }
    }

    fn prev_card(&mut self) {
        if self.session.is_looping() {
            return;
        }
        let before = self.session.cursor();
        self.session.prev();
        if self.session.cursor() != before {
            self.cancel_audio();
        }
    }

    fn shuffle_deck(&mut self) {
        if self.session.is_empty() {
            return;
        }
        match self.session.shuffle(&mut rand::thread_rng()) {
            Ok(()) => {
                self.cancel_audio();
                self.set_status("Deck shuffled", StatusKind::Info);
            }
            Err(_) => self.set_status("Stop the loop before shuffling", StatusKind::Warn),
        }
    }

    /// Step through All and every category the deck carries, in deck order.
    fn cycle_filter(&mut self) {
        if self.session.is_looping() {
            self.set_status("Stop the loop before changing the filter", StatusKind::Warn);
            return;
        }
        let categories = self.session.deck().categories();
        // An uncategorized deck has nothing to cycle, unless a stale
        // --category filter needs widening back to All.
        if categories.is_empty() && *self.session.filter() == CategoryFilter::All {
            self.set_status("This deck has no categories", StatusKind::Info);
            return;
        }

        let mut options: Vec<CategoryFilter> = vec![CategoryFilter::All];
        options.extend(categories.into_iter().map(CategoryFilter::Category));
        let current = options
            .iter()
            .position(|option| option == self.session.filter())
            .unwrap_or(0);
        let next = options[(current + 1) % options.len()].clone();

        let label = next.to_string();
        if self.session.set_filter(next).is_ok() {
            self.cancel_audio();
            if self.session.is_empty() {
                self.set_status(format!("No cards in \"{label}\""), StatusKind::Warn);
            } else {
                self.set_status(format!("Filter: {label}"), StatusKind::Info);
            }
        }
    }

    /// Speak one side of the current card on demand. The answer can only
    /// be spoken once it is on screen.
    fn speak_current(&mut self, side: CardSide) {
        if self.session.is_looping() || self.session.is_empty() {
            return;
        }
        if side == CardSide::Answer && !self.session.answer_visible() {
            return;
        }
        if self.synthesizer.is_none() {
            self.set_status(
                "Speech unavailable: set OPENAI_API_KEY or speech.api_key",
                StatusKind::Warn,
            );
            return;
        }
        if !self.player.available() {
            self.set_status(
                "No audio player found (mpv, ffplay, mpg123, or afplay)",
                StatusKind::Warn,
            );
            return;
        }
        self.request_speech(side, SpeechPurpose::Manual);
    }

    fn toggle_loop(&mut self) {
        if self.session.is_looping() {
            self.session.stop_loop();
            self.cancel_audio();
            info!("auto-loop stopped");
            self.set_status("Loop stopped", StatusKind::Info);
            return;
        }
        if self.synthesizer.is_none() {
            self.set_status(
                "The loop needs speech: set OPENAI_API_KEY or speech.api_key",
                StatusKind::Warn,
            );
            return;
        }
        match self.session.start_loop() {
            Ok(side) => {
                info!("auto-loop started");
                self.request_speech(side, SpeechPurpose::Loop);
            }
            Err(SessionError::EmptyWorkingSet) => {
                self.set_status("No cards to loop over", StatusKind::Warn);
            }
            Err(_) => {}
        }
    }

    fn quit(&mut self) {
        self.player.stop();
        self.running = false;
    }

    // ══════════════════════════════════════════════════════════════════════
    // Event Handling
    // ══════════════════════════════════════════════════════════════════════

    pub fn handle_events(&mut self) -> anyhow::Result<()> {
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    return Ok(());
                }
                self.handle_key(key.code);
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Char('t') => self.cycle_theme(),
            KeyCode::Char(' ') => self.session.toggle_reveal(),
            KeyCode::Char('n') | KeyCode::Right => self.next_card(),
            KeyCode::Char('p') | KeyCode::Left => self.prev_card(),
            KeyCode::Char('s') => self.shuffle_deck(),
            KeyCode::Char('f') => self.cycle_filter(),
            KeyCode::Char('1') => self.speak_current(CardSide::Question),
            KeyCode::Char('2') => self.speak_current(CardSide::Answer),
            KeyCode::Char('a') => self.toggle_loop(),
            _ => {}
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Speech and Playback
    // ══════════════════════════════════════════════════════════════════════

    /// Advance everything that moves without a key press: finished
    /// synthesis requests, finished playback, and loop hold deadlines.
    pub fn tick(&mut self) {
        self.drain_speech_outcomes();

        if self.player.poll_finished() && self.session.is_looping() {
            self.session.loop_audio_finished(Instant::now());
        }

        if let Some(side) = self.session.poll_loop_timer(Instant::now()) {
            self.request_speech(side, SpeechPurpose::Loop);
        }
    }

    /// Kick off synthesis for one side of the current card, superseding
    /// any earlier request or playback.
    fn request_speech(&mut self, side: CardSide, purpose: SpeechPurpose) {
        let Some(card) = self.session.current_card() else {
            return;
        };
        let (text, voice) = match side {
            CardSide::Question => (
                card.question.clone(),
                self.config.speech.voice_question.clone(),
            ),
            CardSide::Answer => (
                card.answer.clone(),
                self.config.speech.voice_answer.clone(),
            ),
        };
        let Some(synthesizer) = self.synthesizer.clone() else {
            if purpose == SpeechPurpose::Loop {
                self.session.loop_speech_failed();
            }
            return;
        };

        self.player.stop();
        self.speech_seq += 1;
        self.pending_speech = Some(PendingSpeech {
            seq: self.speech_seq,
            purpose,
        });
        speech::spawn_synthesis(synthesizer, text, voice, self.speech_seq, self.speech_tx.clone());
    }

    /// Collect finished synthesis requests: drop stale ones, play fresh
    /// ones, and drive the loop through failures.
    fn drain_speech_outcomes(&mut self) {
        while let Ok(outcome) = self.speech_rx.try_recv() {
            let Some(pending) = &self.pending_speech else {
                debug!(seq = outcome.seq, "dropping cancelled speech result");
                continue;
            };
            if outcome.seq != pending.seq {
                debug!(seq = outcome.seq, "dropping superseded speech result");
                continue;
            }
            let purpose = pending.purpose;
            self.pending_speech = None;

            match (purpose, outcome.result) {
                (SpeechPurpose::Manual, Ok(audio)) => {
                    if let Err(err) = self.player.play(&audio) {
                        self.set_status(format!("Playback failed: {err}"), StatusKind::Error);
                    }
                }
                (SpeechPurpose::Manual, Err(err)) => {
                    self.set_status(format!("Speech unavailable: {err}"), StatusKind::Error);
                }
                (SpeechPurpose::Loop, Ok(audio)) => {
                    if !self.session.is_looping() {
                        continue;
                    }
                    if let Err(err) = self.player.play(&audio) {
                        // The hold still happens, just silently.
                        warn!(%err, "loop continues without audio");
                        self.session.loop_audio_finished(Instant::now());
                    }
                }
                (SpeechPurpose::Loop, Err(err)) => {
                    if !self.session.is_looping() {
                        continue;
                    }
                    self.session.loop_speech_failed();
                    self.set_status(format!("Loop stopped, speech failed: {err}"), StatusKind::Error);
                }
            }
        }
    }

    /// Forget the in-flight request and stop playback. A result that later
    /// arrives for the forgotten request dies by sequence number.
    fn cancel_audio(&mut self) {
        self.pending_speech = None;
        self.player.stop();
    }

    // ══════════════════════════════════════════════════════════════════════
    // Rendering
    // ══════════════════════════════════════════════════════════════════════

    pub fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();

        // Clear with background
        frame.render_widget(Clear, area);
        frame.render_widget(
            Block::default().style(Style::default().bg(self.theme.colors.bg_dark)),
            area,
        );

        let chunks = Layout::vertical([
            Constraint::Length(2),   // Header
            Constraint::Length(1),   // Deck status
            Constraint::Length(1),   // Spacing
            Constraint::Min(8),      // Card area
            Constraint::Length(1),   // Status message
            Constraint::Length(2),   // Hints
        ])
        .split(area);

        self.render_header(frame, chunks[0]);
        self.render_deck_status(frame, chunks[1]);
        self.render_cards(frame, chunks[3]);
        self.render_status_message(frame, chunks[4]);
        self.render_hints(frame, chunks[5]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let header = Paragraph::new(Line::from(vec![
            Span::styled(
                format!("{} ", icons::NOTE),
                Style::default().fg(self.theme.colors.accent),
            ),
            Span::styled(&self.deck_title, self.theme.title()),
        ]))
        .alignment(Alignment::Center);
        frame.render_widget(header, area);
    }

    fn render_deck_status(&self, frame: &mut Frame, area: Rect) {
        let looping = match self.session.mode() {
            Mode::Loop { phase, .. } => Some(phase),
            Mode::Manual { .. } => None,
        };
        let bar = DeckStatusBar::new(
            self.session.position(),
            self.session.filter().label(),
            &self.theme,
        )
        .has_categories(!self.session.deck().categories().is_empty())
        .looping(looping)
        .playing(self.player.is_playing());
        frame.render_widget(bar, area);
    }

    fn render_cards(&self, frame: &mut Frame, area: Rect) {
        let Some(card) = self.session.current_card() else {
            let notice_area = centered_rect(60, 60, area);
            frame.render_widget(
                EmptyFilterNotice::new(self.session.filter().label(), &self.theme),
                notice_area,
            );
            return;
        };

        let card_area = centered_rect(84, 100, area);
        if self.session.answer_visible() {
            let halves = Layout::vertical([
                Constraint::Percentage(50),
                Constraint::Percentage(50),
            ])
            .split(card_area);
            frame.render_widget(
                CardPanel::new(&card.question, CardSide::Question, &self.theme),
                halves[0],
            );
            frame.render_widget(
                CardPanel::new(&card.answer, CardSide::Answer, &self.theme),
                halves[1],
            );
        } else {
            frame.render_widget(
                CardPanel::new(&card.question, CardSide::Question, &self.theme),
                card_area,
            );
        }
    }

    fn render_status_message(&self, frame: &mut Frame, area: Rect) {
        // Show status message if recent (within 5 seconds)
        let Some((message, kind, time)) = &self.status_message else {
            return;
        };
        if time.elapsed().as_secs() >= 5 {
            return;
        }
        let color = match kind {
            StatusKind::Info => self.theme.colors.success,
            StatusKind::Warn => self.theme.colors.warning,
            StatusKind::Error => self.theme.colors.error,
        };
        let status = Paragraph::new(message.as_str())
            .alignment(Alignment::Center)
            .style(Style::default().fg(color));
        frame.render_widget(status, area);
    }

    fn render_hints(&self, frame: &mut Frame, area: Rect) {
        let theme_hint = format!("[{}]", self.theme.name.display_name());
        let reveal_hint = if self.session.answer_visible() {
            "hide answer"
        } else {
            "show answer"
        };
        let has_categories = !self.session.deck().categories().is_empty();

        let mut hints: Vec<(&str, &str)> = Vec::new();
        if self.session.is_looping() {
            hints.push(("a", "stop loop"));
        } else if self.session.is_empty() {
            hints.push(("f", "filter"));
        } else {
            hints.push(("Space", reveal_hint));
            hints.push(("n/p", "next/prev"));
            hints.push(("1/2", "listen"));
            hints.push(("s", "shuffle"));
            if has_categories {
                hints.push(("f", "filter"));
            }
            hints.push(("a", "loop"));
        }
        hints.push(("t", &theme_hint));
        hints.push(("q", "quit"));
        frame.render_widget(KeyHints::new(&hints, &self.theme), area);
    }
}

// ══════════════════════════════════════════════════════════════════════════
// Helper Functions
// ══════════════════════════════════════════════════════════════════════════

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);

    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Card;
    use crate::session::LoopTiming;
    use crate::speech::SpeechError;

    /// An app with the speech pipeline unconfigured, driven by key codes.
    fn app(cards: Vec<Card>) -> App {
        let session =
            StudySession::new(Deck::new(cards), CategoryFilter::All, LoopTiming::default())
                .unwrap();
        let (speech_tx, speech_rx) = mpsc::channel();
        App {
            running: true,
            config: Config::default(),
            theme: Theme::default(),
            session,
            deck_title: "cards".to_string(),
            synthesizer: None,
            speech_tx,
            speech_rx,
            speech_seq: 0,
            pending_speech: None,
            player: AudioPlayer::new(),
            status_message: None,
        }
    }

    #[test]
    fn navigation_keys_clamp_and_reset_reveal() {
        let mut app = app(vec![Card::new("q0", "a0"), Card::new("q1", "a1")]);
        app.handle_key(KeyCode::Char(' '));
        assert!(app.session.answer_visible());

        app.handle_key(KeyCode::Char('n'));
        assert!(!app.session.answer_visible());
        app.handle_key(KeyCode::Right);
        assert_eq!(app.session.position(), Some((2, 2)));

        app.handle_key(KeyCode::Char('q'));
        assert!(!app.running);
    }

    #[test]
    fn loop_without_speech_stays_in_manual_mode() {
        let mut app = app(vec![Card::new("q", "a")]);
        app.handle_key(KeyCode::Char('a'));

        assert!(!app.session.is_looping());
        assert_eq!(app.session.cursor(), 0);
        let (message, _, _) = app.status_message.as_ref().unwrap();
        assert!(message.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn failed_loop_synthesis_reverts_to_manual_on_the_same_card() {
        let mut app = app(vec![Card::new("q0", "a0"), Card::new("q1", "a1")]);
        app.session.next();
        app.session.start_loop().unwrap();
        app.pending_speech = Some(PendingSpeech {
            seq: 7,
            purpose: SpeechPurpose::Loop,
        });
        app.speech_tx
            .send(SpeechOutcome {
                seq: 7,
                result: Err(SpeechError::Timeout),
            })
            .unwrap();

        app.tick();
        assert!(!app.session.is_looping());
        assert_eq!(app.session.cursor(), 1);
        assert!(app.status_message.is_some());
    }

    #[test]
    fn superseded_speech_results_are_dropped() {
        let mut app = app(vec![Card::new("q", "a")]);
        app.pending_speech = Some(PendingSpeech {
            seq: 2,
            purpose: SpeechPurpose::Manual,
        });
        app.speech_tx
            .send(SpeechOutcome {
                seq: 1,
                result: Ok(vec![0]),
            })
            .unwrap();

        app.tick();
        assert!(app.pending_speech.is_some(), "newer request still in flight");
        assert!(app.status_message.is_none());
    }
}
