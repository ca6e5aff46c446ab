use std::collections::{HashMap, VecDeque};

use model::{Bar, Interval};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// A bar arrived with an `open_time` behind the current tail.
    #[error("out-of-order bar: open_time {incoming} behind tail {tail}")]
    OutOfOrder { incoming: i64, tail: i64 },

    #[error("unknown interval: {0}")]
    UnknownInterval(Interval),
}

/// What `append_or_replace_last` did with the incoming bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended,
    ReplacedLast,
}

/// A bounded ordered sequence of bars for one interval.
///
/// Invariants: strictly increasing `open_time`; every bar except the tail has
/// `is_closed == true`.
#[derive(Debug)]
pub struct KlineBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl KlineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn tail(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Insert a bar at the tail.
    ///
    /// Same `open_time` as the tail replaces it (live revision or the commit
    /// of an open bar); a later `open_time` appends, evicting from the head
    /// when over capacity; an earlier one is rejected.
    pub fn append_or_replace_last(&mut self, bar: Bar) -> Result<Applied, BufferError> {
        match self.bars.back() {
            None => {
                self.bars.push_back(bar);
                Ok(Applied::Appended)
            }
            Some(tail) if bar.open_time == tail.open_time => {
                *self.bars.back_mut().unwrap() = bar;
                Ok(Applied::ReplacedLast)
            }
            Some(tail) if bar.open_time > tail.open_time => {
                self.bars.push_back(bar);
                while self.bars.len() > self.capacity {
                    self.bars.pop_front();
                }
                Ok(Applied::Appended)
            }
            Some(tail) => Err(BufferError::OutOfOrder {
                incoming: bar.open_time,
                tail: tail.open_time,
            }),
        }
    }

    /// O(log n) lookup by open time.
    pub fn get(&self, open_time: i64) -> Option<&Bar> {
        let (front, back) = self.bars.as_slices();
        for slice in [front, back] {
            if let Ok(idx) = slice.binary_search_by_key(&open_time, |b| b.open_time) {
                return Some(&slice[idx]);
            }
        }
        None
    }

    /// The last `n` closed bars in chronological order. Restartable: each
    /// call builds a fresh iterator over the current contents.
    pub fn last_closed(&self, n: usize) -> impl Iterator<Item = &Bar> {
        let closed: Vec<&Bar> = self.bars.iter().filter(|b| b.is_closed).collect();
        let skip = closed.len().saturating_sub(n);
        closed.into_iter().skip(skip)
    }

    /// All bars, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    pub fn closed_len(&self) -> usize {
        self.bars.iter().filter(|b| b.is_closed).count()
    }
}

/// Buffers for every subscribed interval.
#[derive(Debug)]
pub struct KlineBufferManager {
    buffers: HashMap<Interval, KlineBuffer>,
}

impl KlineBufferManager {
    pub fn new(capacity_by_interval: &HashMap<Interval, usize>) -> Self {
        Self {
            buffers: capacity_by_interval
                .iter()
                .map(|(iv, cap)| (*iv, KlineBuffer::new(*cap)))
                .collect(),
        }
    }

    pub fn buffer(&self, interval: Interval) -> Result<&KlineBuffer, BufferError> {
        self.buffers
            .get(&interval)
            .ok_or(BufferError::UnknownInterval(interval))
    }

    pub fn buffer_mut(&mut self, interval: Interval) -> Result<&mut KlineBuffer, BufferError> {
        self.buffers
            .get_mut(&interval)
            .ok_or(BufferError::UnknownInterval(interval))
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.buffers.keys().copied()
    }

    pub fn sizes(&self) -> HashMap<Interval, usize> {
        self.buffers.iter().map(|(iv, b)| (*iv, b.len())).collect()
    }
}
