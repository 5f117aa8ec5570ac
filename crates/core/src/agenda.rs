//! The interview script: an immutable, ordered list of prompts.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// The questions asked when no agenda file is configured.
pub const DEFAULT_PROMPTS: [&str; 6] = [
    "Hello! Welcome to your backend development interview. Can you tell me about your experience with REST APIs?",
    "That's great! What's the difference between SQL and NoSQL databases?",
    "Interesting! How would you design a rate limiting system?",
    "Excellent! How do you debug slow database queries?",
    "Perfect! How do you ensure data consistency in distributed systems?",
    "Thank you! That concludes our interview. You provided excellent insights!",
];

#[derive(Debug, thiserror::Error)]
pub enum AgendaError {
    #[error("an agenda needs at least one prompt")]
    Empty,
    #[error("could not read agenda file: {0}")]
    Io(#[from] std::io::Error),
}

/// An ordered sequence of prompts. The last prompt is the closing prompt.
///
/// Cloning is cheap; all clones share the same prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agenda {
    prompts: Arc<[String]>,
}

/// A single prompt with its position, as listed by the questions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AgendaItem<'a> {
    pub index: usize,
    pub text: &'a str,
}

impl Agenda {
    /// Builds an agenda from prompts, rejecting an empty list.
    pub fn new<I, S>(prompts: I) -> Result<Self, AgendaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prompts: Vec<String> = prompts.into_iter().map(Into::into).collect();
        if prompts.is_empty() {
            return Err(AgendaError::Empty);
        }
        Ok(Self {
            prompts: prompts.into(),
        })
    }

    /// Parses one prompt per line. Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, AgendaError> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Loads an agenda file in the format accepted by [`Agenda::parse`].
    pub fn from_file(path: &Path) -> Result<Self, AgendaError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.prompts.get(index).map(String::as_str)
    }

    /// The opening prompt, asked without generation.
    pub fn opening(&self) -> &str {
        &self.prompts[0]
    }

    /// The closing prompt.
    pub fn closing(&self) -> &str {
        &self.prompts[self.prompts.len() - 1]
    }

    /// Index of the closing prompt.
    pub fn last_index(&self) -> usize {
        self.prompts.len() - 1
    }

    pub fn items(&self) -> impl Iterator<Item = AgendaItem<'_>> {
        self.prompts
            .iter()
            .enumerate()
            .map(|(index, text)| AgendaItem { index, text })
    }
}

impl Default for Agenda {
    fn default() -> Self {
        Self {
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}
