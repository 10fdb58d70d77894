//! Focus-timer configuration model

use serde::{Deserialize, Serialize};

use super::{Payload, RecordKind};
use crate::error::{Error, Result};

/// Pomodoro-style focus timer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Focus session length in minutes
    pub focus_minutes: u32,
    /// Short break length in minutes
    pub short_break_minutes: u32,
    /// Long break length in minutes
    pub long_break_minutes: u32,
    /// Focus sessions before a long break
    pub sessions_before_long_break: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            sessions_before_long_break: 4,
        }
    }
}

impl Payload for TimerConfig {
    const KIND: RecordKind = RecordKind::Timer;

    fn validate(&self) -> Result<()> {
        let fields = [
            ("focus_minutes", self.focus_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
            ("sessions_before_long_break", self.sessions_before_long_break),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidInput(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}
