use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::time::Instant;

/// One pending firing: record `index` of job `job_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireTarget {
    pub job_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    at: Instant,
    seq: u64,
    index: u32,
}

/// Min-heap of next fire times, at most one live entry per job.
///
/// Re-keying pushes a fresh heap entry and bumps the job's sequence number;
/// heap entries whose sequence no longer matches are discarded lazily.
#[derive(Debug, Default)]
pub struct FireQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    slots: HashMap<String, Slot>,
    seq: u64,
}

impl FireQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule (or re-key) `target.job_id` to fire `target.index` at `at`.
    pub fn schedule(&mut self, target: FireTarget, at: Instant) {
        self.seq += 1;
        let seq = self.seq;
        self.slots.insert(
            target.job_id.clone(),
            Slot {
                at,
                seq,
                index: target.index,
            },
        );
        self.heap.push(Reverse((at, seq, target.job_id)));
    }

    /// Drop a job's pending entry. Returns whether one existed.
    pub fn remove(&mut self, job_id: &str) -> bool {
        self.slots.remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.slots.contains_key(job_id)
    }

    /// Scheduled fire time for a job, if queued.
    pub fn fire_time(&self, job_id: &str) -> Option<Instant> {
        self.slots.get(job_id).map(|s| s.at)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Earliest live fire time.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Remove and return every live entry due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<FireTarget> {
        let mut due = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(Reverse((at, _, _))) if *at <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, _, job_id))) = self.heap.pop() {
                if let Some(slot) = self.slots.remove(&job_id) {
                    due.push(FireTarget {
                        job_id,
                        index: slot.index,
                    });
                }
            }
        }
        due
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((_, seq, job_id))) = self.heap.peek() {
            let live = self.slots.get(job_id).is_some_and(|s| s.seq == *seq);
            if live {
                break;
            }
            self.heap.pop();
        }
    }
}
