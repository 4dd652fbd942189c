//! Progress reporting collaborators.
//!
//! Reporting is a side channel: the sorter calls a [`ProgressSink`] at fixed checkpoints and never
//! depends on what the sink does.

use std::fmt::{self, Display};

/// Batch processing stage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchStage {
    /// Lines are being read into the batch.
    Reading,
    /// Batch partitions are being sorted and spilled.
    Sorting,
}

impl Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStage::Reading => write!(f, "reading"),
            BatchStage::Sorting => write!(f, "sorting"),
        }
    }
}

/// Receives sorting progress notifications. All methods default to no-op.
pub trait ProgressSink: Send {
    /// Called when batch number `current` (1-based) enters `stage`.
    /// `expected` is the number of batches derived from the total lines hint, `0` if unknown.
    fn batch(&mut self, _current: usize, _expected: usize, _stage: BatchStage) {}

    /// Called during the final merge each time another percent of the total lines hint is written.
    fn merged(&mut self, _percent: u64) {}

    /// Called once the final merge is complete.
    fn finished(&mut self) {}
}

/// Discards all notifications.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Reports progress through the `log` facade at debug level.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn batch(&mut self, current: usize, expected: usize, stage: BatchStage) {
        log::debug!("working on temporary file {}/{} ({})", current, expected, stage);
    }

    fn merged(&mut self, percent: u64) {
        log::debug!("merged {}% of lines", percent);
    }
}

/// Turns a running line count into percent checkpoints of the total lines hint.
pub struct MergeProgress {
    step: u64,
    next: u64,
    percent: u64,
}

impl MergeProgress {
    /// Creates a tracker firing every 1% of `total_lines`. A hint under 100 lines never fires.
    pub fn new(total_lines: u64) -> Self {
        let step = total_lines / 100;
        MergeProgress {
            step,
            next: step,
            percent: 0,
        }
    }

    /// Returns the new percentage if `lines` reached the next checkpoint.
    pub fn advance(&mut self, lines: u64) -> Option<u64> {
        if self.step == 0 || lines != self.next {
            return None;
        }

        self.next += self.step;
        self.percent += 1;

        return Some(self.percent);
    }
}
