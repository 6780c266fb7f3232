//! Result output: size-bounded message batching and file export

use crate::classify::models::TargetCountry;
use crate::Result;
use std::fs;
use std::path::Path;

/// Largest message the chat transport accepts, in characters
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// Header placed at the top of every result message
pub fn message_header(country: &TargetCountry) -> String {
    format!("configs: {}\n", country.canonical_name)
}

/// Packs matched lines into messages of at most `max_len` characters.
///
/// Every message starts with `header`. A line that cannot fit next to the
/// header is emitted as its own message, unsplit.
#[derive(Debug, Clone)]
pub struct MessageBatcher {
    header: String,
    max_len: usize,
}

impl MessageBatcher {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            max_len: MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn batch<S: AsRef<str>>(&self, lines: &[S]) -> Vec<String> {
        let header_len = self.header.chars().count();
        let mut messages = Vec::new();
        let mut current = self.header.clone();
        let mut current_len = header_len;

        for line in lines {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            let entry_len = line.chars().count() + 1;

            if current_len + entry_len > self.max_len && current_len > header_len {
                messages.push(std::mem::replace(&mut current, self.header.clone()));
                current_len = header_len;
            }

            current.push_str(line);
            current.push('\n');
            current_len += entry_len;

            // Oversized single line: ship it alone.
            if current_len > self.max_len {
                messages.push(std::mem::replace(&mut current, self.header.clone()));
                current_len = header_len;
            }
        }

        if current_len > header_len {
            messages.push(current);
        }
        messages
    }
}

/// Write matched lines to `path`, one per line
pub fn save_to_file<P: AsRef<Path>, S: AsRef<str>>(lines: &[S], path: P) -> Result<()> {
    let content: String = lines
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join("\n");

    fs::write(path, content)?;
    Ok(())
}
