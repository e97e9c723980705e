/// Operator-facing warnings and notes collected while an operation runs
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Note,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            NoticeLevel::Note => write!(f, "NOTE: {}", self.message),
            NoticeLevel::Warning => write!(f, "WARNING: {}", self.message),
        }
    }
}

/// Ordered list of notices. Every entry is also emitted through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct Notices {
    entries: Vec<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.entries.push(Notice {
            level: NoticeLevel::Warning,
            message,
        });
    }

    pub fn note<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        tracing::info!("{}", message);
        self.entries.push(Notice {
            level: NoticeLevel::Note,
            message,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.entries.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|n| n.level == NoticeLevel::Warning)
            .map(|n| n.message.as_str())
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|n| n.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
