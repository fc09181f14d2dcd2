//! Custom widgets for the recite TUI.

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{block::BorderType, Block, Borders, Paragraph, Widget, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::theme::{icons, Theme};
use crate::session::CardSide;

// ══════════════════════════════════════════════════════════════════════════
// Card Panel Widget
// ══════════════════════════════════════════════════════════════════════════

/// One side of the current card: labeled, bordered, content centered both
/// ways.
pub struct CardPanel<'a> {
    content: &'a str,
    side: CardSide,
    theme: &'a Theme,
}

impl<'a> CardPanel<'a> {
    pub fn new(content: &'a str, side: CardSide, theme: &'a Theme) -> Self {
        Self {
            content,
            side,
            theme,
        }
    }
}

impl Widget for CardPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (label, label_style, border_color) = match self.side {
            CardSide::Question => (
                "QUESTION",
                self.theme.card_question(),
                self.theme.colors.question,
            ),
            CardSide::Answer => (
                "ANSWER",
                self.theme.card_answer(),
                self.theme.colors.answer,
            ),
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(border_color))
            .title(Line::from(vec![
                Span::raw(" "),
                Span::styled(label, label_style),
                Span::raw(" "),
            ]))
            .title_alignment(Alignment::Center);

        let inner = block.inner(area);
        block.render(area, buf);

        // Wrap up front so vertical centering counts display lines, not
        // newlines in the source text.
        let width = (inner.width.saturating_sub(4) as usize).max(1);
        let wrapped = textwrap::wrap(self.content, width);
        let lines: Vec<Line> = wrapped.iter().map(|line| Line::from(line.as_ref())).collect();

        let content_height = lines.len() as u16;
        let vertical_padding = inner.height.saturating_sub(content_height) / 2;
        let content_area = Rect {
            x: inner.x + 2,
            y: inner.y + vertical_padding,
            width: inner.width.saturating_sub(4),
            height: inner.height.saturating_sub(vertical_padding),
        };

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .style(Style::default().fg(self.theme.colors.text))
            .render(content_area, buf);
    }
}

// ══════════════════════════════════════════════════════════════════════════
// Deck Status Bar Widget
// ══════════════════════════════════════════════════════════════════════════

/// Position, active filter, and audio activity in one line.
pub struct DeckStatusBar<'a> {
    position: Option<(usize, usize)>,
    filter_label: &'a str,
    has_categories: bool,
    looping: Option<CardSide>,
    playing: bool,
    theme: &'a Theme,
}

impl<'a> DeckStatusBar<'a> {
    pub fn new(position: Option<(usize, usize)>, filter_label: &'a str, theme: &'a Theme) -> Self {
        Self {
            position,
            filter_label,
            has_categories: false,
            looping: None,
            playing: false,
            theme,
        }
    }

    pub fn has_categories(mut self, has_categories: bool) -> Self {
        self.has_categories = has_categories;
        self
    }

    pub fn looping(mut self, phase: Option<CardSide>) -> Self {
        self.looping = phase;
        self
    }

    pub fn playing(mut self, playing: bool) -> Self {
        self.playing = playing;
        self
    }
}

impl Widget for DeckStatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let chunks = Layout::horizontal([
            Constraint::Percentage(30),
            Constraint::Percentage(40),
            Constraint::Percentage(30),
        ])
        .split(area);

        // Position
        let position_text = match self.position {
            Some((current, total)) => Line::from(vec![
                Span::styled("Card ", Style::default().fg(self.theme.colors.text_muted)),
                Span::styled(current.to_string(), self.theme.highlight()),
                Span::styled(" of ", Style::default().fg(self.theme.colors.text_muted)),
                Span::styled(total.to_string(), self.theme.highlight()),
            ]),
            None => Line::from(Span::styled(
                "No cards",
                Style::default().fg(self.theme.colors.warning),
            )),
        };
        Paragraph::new(position_text)
            .alignment(Alignment::Center)
            .render(chunks[0], buf);

        // Active filter
        if self.has_categories {
            let budget = (chunks[1].width as usize).saturating_sub(10);
            let label = fit_width(self.filter_label, budget);
            let filter_text = Line::from(vec![
                Span::styled("Filter: ", Style::default().fg(self.theme.colors.text_muted)),
                Span::styled(label, Style::default().fg(self.theme.colors.secondary)),
            ]);
            Paragraph::new(filter_text)
                .alignment(Alignment::Center)
                .render(chunks[1], buf);
        }

        // Audio activity
        let activity_text = if let Some(phase) = self.looping {
            Line::from(vec![
                Span::styled(
                    format!("{} LOOP", icons::LOOP),
                    self.theme.loop_indicator(),
                ),
                Span::styled(
                    format!(" · {}", phase.label()),
                    Style::default().fg(self.theme.colors.text_muted),
                ),
            ])
        } else if self.playing {
            Line::from(Span::styled(
                format!("{} playing", icons::NOTE),
                Style::default().fg(self.theme.colors.accent),
            ))
        } else {
            Line::from("")
        };
        Paragraph::new(activity_text)
            .alignment(Alignment::Center)
            .render(chunks[2], buf);
    }
}

/// Truncate `s` to at most `max_width` display columns, ending in an
/// ellipsis when anything was cut.
fn fit_width(s: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > max_width.saturating_sub(1) {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

// ══════════════════════════════════════════════════════════════════════════
// Key Hints Widget
// ══════════════════════════════════════════════════════════════════════════

pub struct KeyHints<'a> {
    hints: &'a [(&'a str, &'a str)],
    theme: &'a Theme,
}

impl<'a> KeyHints<'a> {
    pub fn new(hints: &'a [(&'a str, &'a str)], theme: &'a Theme) -> Self {
        Self { hints, theme }
    }
}

impl Widget for KeyHints<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut spans: Vec<Span> = Vec::new();
        for (i, (key, desc)) in self.hints.iter().enumerate() {
            if i > 0 {
                spans.push(Span::styled(
                    " │ ",
                    Style::default().fg(self.theme.colors.text_dim),
                ));
            }
            spans.push(Span::styled(*key, self.theme.key_highlight()));
            spans.push(Span::styled(format!(" {}", desc), self.theme.key_hint()));
        }

        Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .render(area, buf);
    }
}

// ══════════════════════════════════════════════════════════════════════════
// Empty Filter Notice Widget
// ══════════════════════════════════════════════════════════════════════════

/// Shown in place of the card when the active filter matches nothing.
pub struct EmptyFilterNotice<'a> {
    filter_label: &'a str,
    theme: &'a Theme,
}

impl<'a> EmptyFilterNotice<'a> {
    pub fn new(filter_label: &'a str, theme: &'a Theme) -> Self {
        Self {
            filter_label,
            theme,
        }
    }
}

impl Widget for EmptyFilterNotice<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(self.theme.colors.warning))
            .title(Line::from(vec![
                Span::raw(" "),
                Span::styled(
                    "NO MATCHES",
                    Style::default()
                        .fg(self.theme.colors.warning)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(" "),
            ]))
            .title_alignment(Alignment::Center);

        let inner = block.inner(area);
        block.render(area, buf);

        let text = vec![
            Line::from(""),
            Line::from(vec![Span::styled(
                format!("No cards in category \"{}\".", self.filter_label),
                Style::default().fg(self.theme.colors.text),
            )]),
            Line::from(""),
            Line::from(vec![
                Span::styled("Press ", Style::default().fg(self.theme.colors.text_dim)),
                Span::styled("f", self.theme.key_highlight()),
                Span::styled(
                    " to pick another filter",
                    Style::default().fg(self.theme.colors.text_dim),
                ),
            ]),
        ];

        Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(inner, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_width_passes_short_labels_through() {
        assert_eq!(fit_width("Storia", 10), "Storia");
        assert_eq!(fit_width("All", 3), "All");
    }

    #[test]
    fn fit_width_truncates_by_display_columns() {
        assert_eq!(fit_width("Storia Contemporanea", 8), "Storia …");
        // Wide characters count double.
        assert_eq!(fit_width("日本語のカテゴリ", 7), "日本語…");
        assert_eq!(fit_width("anything", 0), "");
    }
}
