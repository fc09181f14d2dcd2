//! Configuration persistence for the recite app.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::LoopTiming;
use crate::speech::SpeechOptions;

/// Application configuration that persists between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The currently selected theme name.
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub study: StudyConfig,
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Voice used for the question side.
    #[serde(default = "default_voice_question")]
    pub voice_question: String,
    /// Voice used for the answer side.
    #[serde(default = "default_voice_answer")]
    pub voice_answer: String,
    /// Playback speed asked of the API, 0.25 to 4.0.
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// API key fallback; the OPENAI_API_KEY environment variable wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Auto-loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Seconds to think after hearing the question.
    #[serde(default = "default_thinking_secs")]
    pub thinking_secs: f64,
    /// Seconds to dwell on the answer before the next card.
    #[serde(default = "default_review_secs")]
    pub review_secs: f64,
}

fn default_theme() -> String {
    "default".to_string()
}

fn default_voice_question() -> String {
    "alloy".to_string()
}

fn default_voice_answer() -> String {
    "nova".to_string()
}

fn default_speed() -> f64 {
    1.0
}

fn default_model() -> String {
    "tts-1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_thinking_secs() -> f64 {
    8.0
}

fn default_review_secs() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            speech: SpeechConfig::default(),
            study: StudyConfig::default(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice_question: default_voice_question(),
            voice_answer: default_voice_answer(),
            speed: default_speed(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
        }
    }
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            thinking_secs: default_thinking_secs(),
            review_secs: default_review_secs(),
        }
    }
}

impl SpeechConfig {
    /// Resolve the API key: environment first, then the config file. Blank
    /// values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        pick_key(std::env::var("OPENAI_API_KEY").ok(), self.api_key.clone())
    }

    pub fn options(&self) -> SpeechOptions {
        SpeechOptions {
            model: self.model.clone(),
            speed: self.speed,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

impl StudyConfig {
    pub fn timing(&self) -> LoopTiming {
        LoopTiming {
            thinking: secs(self.thinking_secs, default_thinking_secs()),
            review: secs(self.review_secs, default_review_secs()),
        }
    }
}

fn pick_key(env: Option<String>, file: Option<String>) -> Option<String> {
    env.filter(|key| !key.trim().is_empty())
        .or_else(|| file.filter(|key| !key.trim().is_empty()))
}

/// Seconds to a duration, falling back on non-finite or overflowing
/// values and flooring negatives at zero.
fn secs(value: f64, fallback: f64) -> Duration {
    let value = if value.is_finite() { value } else { fallback };
    Duration::try_from_secs_f64(value.max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recite")
            .join("config.toml")
    }

    /// Load config from disk, returning default if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            theme = "kanagawa-wave"

            [speech]
            voice_answer = "onyx"
            "#,
        )
        .unwrap();

        assert_eq!(config.theme, "kanagawa-wave");
        assert_eq!(config.speech.voice_question, "alloy");
        assert_eq!(config.speech.voice_answer, "onyx");
        assert_eq!(config.speech.model, "tts-1");
        assert_eq!(config.study.thinking_secs, 8.0);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.theme, "default");
        assert_eq!(config.speech.speed, 1.0);
        assert_eq!(config.study.review_secs, 5.0);
        assert_eq!(config.speech.api_key, None);
    }

    #[test]
    fn environment_key_wins_over_file_key() {
        assert_eq!(
            pick_key(Some("env-key".into()), Some("file-key".into())),
            Some("env-key".into())
        );
        assert_eq!(pick_key(None, Some("file-key".into())), Some("file-key".into()));
        assert_eq!(pick_key(Some("  ".into()), Some("file-key".into())), Some("file-key".into()));
        assert_eq!(pick_key(Some("".into()), None), None);
    }

    #[test]
    fn timing_guards_against_nonsense_values() {
        let study = StudyConfig {
            thinking_secs: -3.0,
            review_secs: f64::NAN,
        };
        let timing = study.timing();
        assert_eq!(timing.thinking, Duration::ZERO);
        assert_eq!(timing.review, Duration::from_secs(5));

        // Finite but far past what a Duration can hold.
        let study = StudyConfig {
            thinking_secs: 1e20,
            review_secs: f64::INFINITY,
        };
        let timing = study.timing();
        assert_eq!(timing.thinking, Duration::from_secs(8));
        assert_eq!(timing.review, Duration::from_secs(5));
    }

    #[test]
    fn huge_configured_durations_fall_back() {
        let config: Config = toml::from_str(
            r#"
            [study]
            thinking_secs = 1e20
            "#,
        )
        .unwrap();

        let timing = config.study.timing();
        assert_eq!(timing.thinking, Duration::from_secs(8));
        assert_eq!(timing.review, Duration::from_secs(5));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = Config::default();
        config.speech.speed = 0.9;
        config.study.thinking_secs = 12.5;

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("api_key"));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.speech.speed, 0.9);
        assert_eq!(back.study.thinking_secs, 12.5);
    }
}
