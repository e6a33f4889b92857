//! Chat transcript shown on the device screen
//!
//! The pipeline pushes `(tag, text)` lines through a bounded queue; the
//! display-owning loop drains it on every refresh. Appending never blocks:
//! when the queue is full the line is dropped and logged.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// One line of the chat log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Speaker or subsystem (e.g. "You", "Gemini", "STT")
    pub tag: String,

    /// Line text
    pub text: String,

    /// When the line was appended
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.tag,
            self.text
        )
    }
}

/// Producer side of the chat log
#[derive(Debug, Clone)]
pub struct TranscriptSink {
    tx: mpsc::Sender<ChatLine>,
}

impl TranscriptSink {
    /// Append a line; never blocks
    pub fn append(&self, tag: impl Into<String>, text: impl Into<String>) {
        let line = ChatLine {
            tag: tag.into(),
            text: text.into(),
            timestamp: Local::now(),
        };

        if let Err(e) = self.tx.try_send(line) {
            match e {
                mpsc::error::TrySendError::Full(line) => {
                    tracing::warn!(tag = %line.tag, "transcript queue full, dropping line");
                }
                mpsc::error::TrySendError::Closed(line) => {
                    tracing::debug!(tag = %line.tag, "transcript closed, dropping line");
                }
            }
        }
    }
}

/// Consumer side of the chat log, owned by the display loop
#[derive(Debug)]
pub struct TranscriptLog {
    rx: mpsc::Receiver<ChatLine>,
    lines: VecDeque<ChatLine>,
    retained: usize,
}

/// Create a connected sink/log pair
///
/// `capacity` bounds the pending queue, `retained` bounds the lines kept
/// for display.
#[must_use]
pub fn channel(capacity: usize, retained: usize) -> (TranscriptSink, TranscriptLog) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TranscriptSink { tx },
        TranscriptLog {
            rx,
            lines: VecDeque::new(),
            retained,
        },
    )
}

impl TranscriptLog {
    /// Move pending lines into the retained log, returning the new ones
    pub fn drain(&mut self) -> Vec<ChatLine> {
        let mut fresh = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            fresh.push(line);
        }

        for line in &fresh {
            self.lines.push_back(line.clone());
        }
        while self.lines.len() > self.retained {
            self.lines.pop_front();
        }

        fresh
    }

    /// Lines currently on screen, oldest first
    #[must_use]
    pub const fn lines(&self) -> &VecDeque<ChatLine> {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_arrive_in_call_order() {
        let (sink, mut log) = channel(8, 8);
        sink.append("You", "hello");
        sink.append("Gemini", "hi");

        let lines = log.drain();
        let tags: Vec<_> = lines.iter().map(|l| l.tag.as_str()).collect();
        assert_eq!(tags, ["You", "Gemini"]);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (sink, mut log) = channel(2, 8);
        sink.append("a", "1");
        sink.append("b", "2");
        sink.append("c", "3");

        let lines = log.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "2");
    }

    #[test]
    fn retention_keeps_newest() {
        let (sink, mut log) = channel(8, 2);
        for i in 0..4 {
            sink.append("n", i.to_string());
        }
        log.drain();

        let kept: Vec<_> = log.lines().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(kept, ["2", "3"]);
    }

    #[test]
    fn display_includes_tag() {
        let (sink, mut log) = channel(1, 1);
        sink.append("STT", "Processing audio...");
        let line = log.drain().remove(0);
        assert!(line.to_string().ends_with("STT: Processing audio..."));
    }
}
