//! Local audio playback through an external player binary.
//!
//! Synthesized mp3 bytes land in a scratch file that is handed to the
//! first player found on PATH. The child runs detached from the terminal;
//! the UI polls [`AudioPlayer::poll_finished`] once per tick and calls
//! [`AudioPlayer::stop`] to cut playback short.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

/// Player commands tried in order, with flags that keep them quiet and
/// windowless.
const BACKENDS: &[(&str, &[&str])] = &[
    ("mpv", &["--no-terminal", "--really-quiet", "--no-video"]),
    ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
    ("mpg123", &["-q"]),
    ("afplay", &[]),
];

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no audio player found (looked for mpv, ffplay, mpg123, afplay)")]
    NoBackend,
    #[error("failed to write audio scratch file: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("failed to start {player}: {source}")]
    Spawn {
        player: &'static str,
        #[source]
        source: std::io::Error,
    },
}

struct Playing {
    child: Child,
    // Keeps the scratch file alive until playback ends.
    _scratch: NamedTempFile,
}

pub struct AudioPlayer {
    backend: Option<(&'static str, &'static [&'static str])>,
    playing: Option<Playing>,
}

impl AudioPlayer {
    /// Pick the first usable backend on PATH. Construction never fails:
    /// without a backend every [`play`](Self::play) reports
    /// [`PlayerError::NoBackend`].
    pub fn new() -> Self {
        let backend = BACKENDS
            .iter()
            .copied()
            .find(|(program, _)| binary_exists(program));
        match backend {
            Some((program, _)) => debug!(player = program, "audio backend selected"),
            None => warn!("no audio player on PATH, playback disabled"),
        }
        Self {
            backend,
            playing: None,
        }
    }

    pub fn available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    /// Start playing `bytes` as mp3, replacing any current playback.
    pub fn play(&mut self, bytes: &[u8]) -> Result<(), PlayerError> {
        self.stop();
        let (program, args) = self.backend.ok_or(PlayerError::NoBackend)?;

        let mut scratch = tempfile::Builder::new()
            .prefix("recite-")
            .suffix(".mp3")
            .tempfile()
            .map_err(PlayerError::Scratch)?;
        scratch.write_all(bytes).map_err(PlayerError::Scratch)?;
        scratch.flush().map_err(PlayerError::Scratch)?;

        let child = Command::new(program)
            .args(args)
            .arg(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PlayerError::Spawn {
                player: program,
                source,
            })?;
        debug!(player = program, bytes = bytes.len(), "playback started");

        self.playing = Some(Playing {
            child,
            _scratch: scratch,
        });
        Ok(())
    }

    /// True exactly once, on the tick where the current playback ended.
    pub fn poll_finished(&mut self) -> bool {
        let Some(playing) = self.playing.as_mut() else {
            return false;
        };
        match playing.child.try_wait() {
            Ok(None) => false,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!(%status, "audio player exited abnormally");
                }
                self.playing = None;
                true
            }
            Err(err) => {
                warn!(%err, "lost track of audio player");
                self.playing = None;
                true
            }
        }
    }

    /// Kill and reap the current playback, if any.
    pub fn stop(&mut self) {
        if let Some(mut playing) = self.playing.take() {
            let _ = playing.child.kill();
            let _ = playing.child.wait();
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn binary_exists(program: &str) -> bool {
    // Spawnability is the test; exit status does not matter since not all
    // players know --version.
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_not_reported_as_existing() {
        assert!(!binary_exists("recite-no-such-player-binary"));
    }

    #[test]
    fn play_without_backend_reports_no_backend() {
        let mut player = AudioPlayer {
            backend: None,
            playing: None,
        };
        assert!(!player.available());
        assert!(matches!(player.play(b"mp3"), Err(PlayerError::NoBackend)));
        assert!(!player.poll_finished());
    }

    #[test]
    fn stop_and_poll_are_safe_when_idle() {
        let mut player = AudioPlayer {
            backend: None,
            playing: None,
        };
        player.stop();
        assert!(!player.poll_finished());
        assert!(!player.is_playing());
    }
}
