//! Task model

use serde::{Deserialize, Serialize};

use super::{Payload, RecordKind};
use crate::error::{Error, Result};

/// A to-do item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }

    #[must_use]
    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

impl Payload for Task {
    const KIND: RecordKind = RecordKind::Task;

    fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidInput("task text cannot be empty".into()));
        }
        Ok(())
    }
}
