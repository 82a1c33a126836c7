//! Configuration management
//!
//! Loaded from a TOML document; every field falls back to its default.

use serde::{Deserialize, Serialize};

/// Shell session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Items a pipeline FIFO buffers before writers block.
    #[serde(default = "default_fifo_capacity")]
    pub fifo_capacity: usize,

    #[serde(default = "default_history_max")]
    pub history_max: usize,

    /// Minimum duration of one `while`/`until` iteration.
    #[serde(default = "default_loop_floor_ms")]
    pub loop_floor_ms: u64,

    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,

    /// Simulated utterance length for the speech device.
    #[serde(default = "default_speech_ms_per_char")]
    pub speech_ms_per_char: u64,

    /// Trace every simple command with its expanded argv.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            fifo_capacity: default_fifo_capacity(),
            history_max: default_history_max(),
            loop_floor_ms: default_loop_floor_ms(),
            prompt: default_prompt(),
            continuation_prompt: default_continuation_prompt(),
            speech_ms_per_char: default_speech_ms_per_char(),
            verbose: false,
        }
    }
}

fn default_fifo_capacity() -> usize {
    10_000
}

fn default_history_max() -> usize {
    1000
}

fn default_loop_floor_ms() -> u64 {
    1000
}

fn default_prompt() -> String {
    "$ ".to_string()
}

fn default_continuation_prompt() -> String {
    "> ".to_string()
}

fn default_speech_ms_per_char() -> u64 {
    40
}

impl ShellConfig {
    /// Load config from a TOML string
    pub fn from_toml(toml_str: &str) -> Self {
        match toml::from_str(toml_str) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "invalid shell config, using defaults");
                Self::default()
            }
        }
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Option<String> {
        toml::to_string_pretty(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ShellConfig::from_toml("fifo_capacity = 4\nprompt = \"% \"\n");
        assert_eq!(config.fifo_capacity, 4);
        assert_eq!(config.prompt, "% ");
        assert_eq!(config.history_max, 1000);
        assert_eq!(config.loop_floor_ms, 1000);
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let config = ShellConfig::from_toml("fifo_capacity = \"lots\"");
        assert_eq!(config.fifo_capacity, 10_000);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ShellConfig::default();
        config.verbose = true;
        let text = config.to_toml().unwrap();
        let back = ShellConfig::from_toml(&text);
        assert!(back.verbose);
        assert_eq!(back.continuation_prompt, "> ");
    }
}
