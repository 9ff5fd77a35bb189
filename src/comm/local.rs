//! In-process worker group backed by shared memory.
//!
//! [`LocalComm`] hosts a fixed group of workers on caller-provided threads
//! and implements every collective on top of one generation-counted
//! exchange round: each worker deposits its contribution, the round opens
//! once all have deposited, and it is recycled once all have read it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::comm::{Communicator, GatherLayout, COORDINATOR};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Message {
    Sum(u64),
    Count(u32),
    Values(Vec<f64>),
    Scalar(Option<f64>),
}

struct Round {
    generation: u64,
    deposited: usize,
    collected: usize,
    slots: Vec<Option<Message>>,
}

struct Shared {
    round: Mutex<Round>,
    ready: Condvar,
}

/// One worker's handle into an in-process group.
///
/// Handles are created together by [`LocalComm::group`] and moved onto the
/// threads that act as workers. Every collective blocks until the whole
/// group participates, so each thread must own exactly one handle and all
/// threads must issue the same sequence of collectives.
pub struct LocalComm {
    rank: usize,
    size: usize,
    next_generation: AtomicU64,
    shared: Arc<Shared>,
}

impl LocalComm {
    /// Create a group of `size` connected handles, one per rank.
    pub fn group(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a worker group needs at least one member");
        let shared = Arc::new(Shared {
            round: Mutex::new(Round {
                generation: 0,
                deposited: 0,
                collected: 0,
                slots: vec![None; size],
            }),
            ready: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                next_generation: AtomicU64::new(0),
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// All-exchange: deposit one message, return every worker's message
    /// indexed by rank. Rounds are strictly ordered by generation so a
    /// worker that finishes early cannot corrupt a round its peers are
    /// still reading.
    fn exchange(&self, message: Message) -> Result<Vec<Message>> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut round = lock(&self.shared.round)?;
        while round.generation != generation {
            round = wait(&self.shared.ready, round)?;
        }
        round.slots[self.rank] = Some(message);
        round.deposited += 1;
        if round.deposited == self.size {
            self.shared.ready.notify_all();
        }
        while round.deposited < self.size {
            round = wait(&self.shared.ready, round)?;
        }
        let messages = round
            .slots
            .iter()
            .map(|slot| {
                slot.clone()
                    .ok_or_else(|| Error::Comm("collective slot left empty".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        round.collected += 1;
        if round.collected == self.size {
            round.deposited = 0;
            round.collected = 0;
            for slot in round.slots.iter_mut() {
                *slot = None;
            }
            round.generation += 1;
            self.shared.ready.notify_all();
        }
        Ok(messages)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum(&self, value: u64) -> Result<u64> {
        let messages = self.exchange(Message::Sum(value))?;
        let mut total: u64 = 0;
        for message in messages {
            match message {
                Message::Sum(v) => total += v,
                _ => return Err(mismatched("sum")),
            }
        }
        Ok(total)
    }

    fn gather_counts(&self, count: u32) -> Result<Option<Vec<u32>>> {
        let messages = self.exchange(Message::Count(count))?;
        if self.rank != COORDINATOR {
            return Ok(None);
        }
        let mut counts = Vec::with_capacity(self.size);
        for message in messages {
            match message {
                Message::Count(c) => counts.push(c),
                _ => return Err(mismatched("gather_counts")),
            }
        }
        Ok(Some(counts))
    }

    fn gather_values(
        &self,
        values: &[f64],
        layout: Option<&GatherLayout>,
    ) -> Result<Option<Vec<f64>>> {
        let messages = self.exchange(Message::Values(values.to_vec()))?;
        if self.rank != COORDINATOR {
            return Ok(None);
        }
        let layout = layout
            .ok_or_else(|| Error::Comm("gather_values needs a layout at the coordinator".into()))?;
        let mut pool = vec![0.0; layout.total()];
        for (rank, message) in messages.into_iter().enumerate() {
            let chunk = match message {
                Message::Values(v) => v,
                _ => return Err(mismatched("gather_values")),
            };
            if chunk.len() != layout.counts()[rank] as usize {
                return Err(Error::Comm(format!(
                    "rank {} sent {} values but the layout expects {}",
                    rank,
                    chunk.len(),
                    layout.counts()[rank]
                )));
            }
            let at = layout.displacements()[rank] as usize;
            pool[at..at + chunk.len()].copy_from_slice(&chunk);
        }
        Ok(Some(pool))
    }

    fn broadcast(&self, value: Option<f64>) -> Result<f64> {
        let messages = self.exchange(Message::Scalar(value))?;
        match &messages[COORDINATOR] {
            Message::Scalar(Some(v)) => Ok(*v),
            Message::Scalar(None) => {
                Err(Error::Comm("broadcast with no value at the coordinator".into()))
            }
            _ => Err(mismatched("broadcast")),
        }
    }
}

fn mismatched(op: &str) -> Error {
    Error::Comm(format!("workers disagree on the collective in flight: {op}"))
}

fn lock(round: &Mutex<Round>) -> Result<MutexGuard<'_, Round>> {
    round.lock().map_err(|_| poisoned())
}

fn wait<'a>(ready: &Condvar, guard: MutexGuard<'a, Round>) -> Result<MutexGuard<'a, Round>> {
    ready.wait(guard).map_err(|_| poisoned())
}

fn poisoned() -> Error {
    Error::Comm("worker group poisoned by a failed peer".into())
}
