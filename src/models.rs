//! Data models for cards, decks, and category filters.

use std::fmt;

/// A single flashcard, one row of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: Option<String>,
    pub category: Option<String>,
    pub question: String,
    pub answer: String,
}

impl Card {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: None,
            category: None,
            question: question.into(),
            answer: answer.into(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// The full set of cards in load order. Immutable once loaded; navigation
/// state lives in [`crate::session::StudySession`].
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<Card>,
}

impl Deck {
    pub fn new(cards: Vec<Card>) -> Self {
        Self { cards }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn card(&self, index: usize) -> Option<&Card> {
        self.cards.get(index)
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Distinct category labels in first-appearance order. Cards without a
    /// category contribute nothing.
    pub fn categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for card in &self.cards {
            if let Some(category) = &card.category {
                if !seen.iter().any(|c| c == category) {
                    seen.push(category.clone());
                }
            }
        }
        seen
    }
}

/// Active category selection used to derive the working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    Category(String),
}

impl CategoryFilter {
    pub fn matches(&self, card: &Card) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Category(name) => card.category.as_deref() == Some(name.as_str()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            CategoryFilter::All => "All",
            CategoryFilter::Category(name) => name,
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
