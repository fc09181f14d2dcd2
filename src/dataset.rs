//! Card file loading with dialect detection.
//!
//! The decks this tool is fed come from spreadsheet exports of very mixed
//! pedigree: Italian Excel likes semicolon-separated Latin-1, everything
//! else is comma-separated UTF-8. Rather than asking the user, each known
//! dialect is tried in turn and the first one that yields a recognizable
//! header and at least one usable row wins.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::models::{Card, Deck};

const REQUIRED_COLUMNS: &str = "question and answer (optional: id, category)";

#[derive(Debug, Clone, Copy)]
enum Encoding {
    Utf8,
    Latin1,
}

/// Dialects in the order they are attempted.
const DIALECTS: &[(u8, Encoding)] = &[
    (b';', Encoding::Latin1),
    (b',', Encoding::Utf8),
    (b',', Encoding::Latin1),
];

/// Load a deck from `path`, sniffing delimiter and encoding.
///
/// Rows with an empty question or answer are skipped with a warning; the
/// load fails only when no dialect produces any usable card.
pub fn load_deck(path: &Path) -> Result<Deck> {
    let raw = fs::read(path).with_context(|| format!("failed to read card file {}", path.display()))?;

    for &(delimiter, encoding) in DIALECTS {
        let Some(text) = decode(&raw, encoding) else {
            continue;
        };
        let Some(cards) = parse_cards(&text, delimiter) else {
            continue;
        };
        if cards.is_empty() {
            continue;
        }
        debug!(
            delimiter = %(delimiter as char),
            encoding = ?encoding,
            cards = cards.len(),
            "card file parsed"
        );
        return Ok(Deck::new(cards));
    }

    bail!(
        "{} is not a usable card file: expected columns {}",
        path.display(),
        REQUIRED_COLUMNS
    )
}

fn decode(raw: &[u8], encoding: Encoding) -> Option<String> {
    match encoding {
        Encoding::Utf8 => String::from_utf8(raw.to_vec()).ok(),
        // Latin-1 maps every byte to the code point of the same value.
        Encoding::Latin1 => Some(raw.iter().map(|&b| b as char).collect()),
    }
}

/// Parse `text` with the given delimiter. Returns `None` when the header
/// does not carry the required columns, which signals a wrong dialect.
fn parse_cards(text: &str, delimiter: u8) -> Option<Vec<Card>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().ok()?.clone();
    let column = |name: &str| headers.iter().position(|h| normalize_header(h) == name);
    let question_col = column("question")?;
    let answer_col = column("answer")?;
    let id_col = column("id");
    let category_col = column("category");

    let mut cards = Vec::new();
    for (row, record) in reader.records().enumerate() {
        // Header occupies line 1, so data rows start at line 2.
        let line = row + 2;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(line, %err, "skipping unreadable row");
                continue;
            }
        };
        let field = |col: usize| record.get(col).filter(|value| !value.is_empty());
        let (Some(question), Some(answer)) = (field(question_col), field(answer_col)) else {
            warn!(line, "skipping row with empty question or answer");
            continue;
        };

        let mut card = Card::new(question, answer);
        card.id = id_col.and_then(field).map(str::to_string);
        if let Some(category) = category_col.and_then(field) {
            card = card.with_category(category);
        }
        cards.push(card);
    }

    Some(cards)
}

/// Lower-case the header cell and strip a UTF-8 BOM so `\u{feff}question`
/// still matches.
fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}
