//! Bounded output history for a single agent.

use std::collections::VecDeque;

use super::types::OutputLine;

/// Maximum number of lines retained per agent.
pub const OUTPUT_BUFFER_CAPACITY: usize = 10_000;

/// Ring buffer of output lines; pushing past capacity evicts the oldest line.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    capacity: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_capacity(OUTPUT_BUFFER_CAPACITY)
    }
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, line: OutputLine) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputLine> {
        self.lines.iter()
    }

    /// Skip `offset` lines from the oldest, then take at most `limit`.
    pub fn slice(&self, limit: Option<usize>, offset: usize) -> Vec<OutputLine> {
        let take = limit.unwrap_or(usize::MAX);
        self.lines.iter().skip(offset).take(take).cloned().collect()
    }
}
