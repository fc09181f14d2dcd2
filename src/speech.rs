//! Speech synthesis through the OpenAI audio API.
//!
//! Requests are blocking and bounded by a timeout, so they always run on a
//! worker thread ([`spawn_synthesis`]) and report back over a channel the
//! UI polls each tick. Every request carries a sequence number; the UI
//! drops results whose number no longer matches the request it is waiting
//! for, which is how cancelled or superseded audio dies quietly.

use std::fmt;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

pub const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Voices the speech endpoint accepts.
pub const VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Speed range the endpoint accepts; values outside are clamped.
const SPEED_RANGE: (f64, f64) = (0.25, 4.0);

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("no API key configured (set OPENAI_API_KEY or speech.api_key)")]
    MissingCredential,
    #[error("speech request timed out")]
    Timeout,
    #[error("speech request failed: {0}")]
    Transport(reqwest::Error),
    #[error("speech API returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// Synthesizer tuning, filled from [`crate::config::SpeechConfig`].
#[derive(Debug, Clone)]
pub struct SpeechOptions {
    pub model: String,
    pub speed: f64,
    pub timeout: Duration,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            speed: 1.0,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct Synthesizer {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    speed: f64,
}

// Manual impl so the API key never lands in debug output.
impl fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synthesizer")
            .field("model", &self.model)
            .field("speed", &self.speed)
            .finish_non_exhaustive()
    }
}

impl Synthesizer {
    /// Build a synthesizer, refusing a blank key up front so callers can
    /// surface "speech unavailable" before any request goes out.
    pub fn new(api_key: &str, options: &SpeechOptions) -> Result<Self, SpeechError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(SpeechError::MissingCredential);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(SpeechError::Transport)?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: options.model.clone(),
            speed: options.speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1),
        })
    }

    /// The `speed` field is omitted at 1.0, matching what the API treats
    /// as its default.
    fn request_body(&self, text: &str, voice: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "input": text,
            "voice": voice,
        });
        if (self.speed - 1.0).abs() > f64::EPSILON {
            body["speed"] = json!(self.speed);
        }
        body
    }

    /// Synthesize `text` with `voice` and return the mp3 bytes. Blocks for
    /// up to the configured timeout.
    pub fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        debug!(voice, chars = text.chars().count(), "requesting speech synthesis");
        let response = self
            .client
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text, voice))
            .send()
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(SpeechError::Api {
                status: status.as_u16(),
                message: excerpt(&message),
            });
        }

        let bytes = response.bytes().map_err(map_transport)?;
        debug!(bytes = bytes.len(), "speech synthesis complete");
        Ok(bytes.to_vec())
    }
}

fn map_transport(err: reqwest::Error) -> SpeechError {
    if err.is_timeout() {
        SpeechError::Timeout
    } else {
        SpeechError::Transport(err)
    }
}

/// Compress an API error body to a single short line for the status bar.
fn excerpt(body: &str) -> String {
    let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 160 {
        flat
    } else {
        let cut: String = flat.chars().take(160).collect();
        format!("{cut}…")
    }
}

/// One finished synthesis, tagged with the sequence number of the request
/// that produced it.
#[derive(Debug)]
pub struct SpeechOutcome {
    pub seq: u64,
    pub result: Result<Vec<u8>, SpeechError>,
}

/// Run one synthesis on a worker thread and deliver the outcome on `tx`.
/// A closed receiver just means the app is shutting down.
pub fn spawn_synthesis(
    synthesizer: Synthesizer,
    text: String,
    voice: String,
    seq: u64,
    tx: Sender<SpeechOutcome>,
) {
    thread::spawn(move || {
        let result = synthesizer.synthesize(&text, &voice);
        if let Err(err) = &result {
            warn!(seq, %err, "speech synthesis failed");
        }
        let _ = tx.send(SpeechOutcome { seq, result });
    });
}
