//! Bounded FIFO of the most recent bars for one symbol.

use std::collections::VecDeque;

use thiserror::Error;

use crate::models::Bar;

use super::features::BarWindow;

/// Error from appending to a [`BarBuffer`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// Bar timestamp is not strictly greater than the last buffered bar.
    #[error("out of order bar: {time} <= {last}")]
    OutOfOrderBar {
        /// Rejected bar's timestamp.
        time: i64,
        /// Last accepted timestamp.
        last: i64,
    },
}

/// Sliding window of the last `capacity` bars, oldest evicted first.
///
/// Capacity must cover the longest indicator lookback of the feature
/// engine; the predictor only runs once the buffer is full.
#[derive(Debug)]
pub struct BarBuffer {
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl BarBuffer {
    /// Default capacity, matching the training window.
    pub const DEFAULT_CAPACITY: usize = 350;

    /// Create a buffer holding at most `capacity` bars.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a bar, evicting the oldest when full.
    ///
    /// # Errors
    ///
    /// `OutOfOrderBar` when the bar's timestamp does not advance past the
    /// last accepted bar; the buffer is left unchanged.
    pub fn push(&mut self, bar: Bar) -> Result<(), BufferError> {
        if let Some(last) = self.bars.back() {
            if bar.time <= last.time {
                return Err(BufferError::OutOfOrderBar {
                    time: bar.time,
                    last: last.time,
                });
            }
        }
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        Ok(())
    }

    /// Number of buffered bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// True when no bars are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once enough bars are buffered for prediction.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.bars.len() >= self.capacity
    }

    /// Most recent bar, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Ordered columnar view for the feature engine.
    #[must_use]
    pub fn snapshot(&self) -> BarWindow {
        let mut window = BarWindow::default();
        for bar in &self.bars {
            window.push(bar);
        }
        window
    }

    /// Drop all buffered bars.
    pub fn clear(&mut self) {
        self.bars.clear();
    }
}
