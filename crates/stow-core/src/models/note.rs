//! Note model

use serde::{Deserialize, Serialize};

use super::{Payload, RecordKind};
use crate::error::{Error, Result};

/// A free-form note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Short title, may be empty when the body is not
    pub title: String,
    /// Plain text body
    pub body: String,
}

impl Note {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Title when present, otherwise the first body line, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.body.lines().next().unwrap_or("")
        } else {
            self.title.as_str()
        };
        source.trim().chars().take(max_len).collect()
    }

    /// Check if note is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body.trim().is_empty()
    }
}

impl Payload for Note {
    const KIND: RecordKind = RecordKind::Note;

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidInput("note needs a title or a body".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_preview() {
        let note = Note::new("", "First line\nSecond line\nThird line");
        assert_eq!(note.title_preview(50), "First line");
        assert_eq!(note.title_preview(5), "First");

        let titled = Note::new("Groceries", "milk");
        assert_eq!(titled.title_preview(50), "Groceries");
    }

    #[test]
    fn test_is_empty() {
        assert!(Note::new("  ", "\n").is_empty());
        assert!(Note::new("  ", "\n").validate().is_err());
        assert!(Note::new("Hello", "").validate().is_ok());
    }
}
