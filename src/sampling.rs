//! Random draws used to sample success recording.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

/// Source of uniform random integers.
pub trait RandomSource: Send + Sync + 'static {
    /// Returns a value in `0..bound`. `bound` is never zero.
    fn below(&self, bound: u32) -> u32;

    /// True with probability `1 / per`.
    fn one_in(&self, per: u32) -> bool {
        per <= 1 || self.below(per) == 0
    }
}

/// Draws from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn below(&self, bound: u32) -> u32 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Replays a fixed sequence of draws, then repeats the last one.
///
/// Values are reduced modulo the requested bound.
#[derive(Debug)]
pub struct ScriptedRandom {
    draws: Mutex<VecDeque<u32>>,
    last: Mutex<u32>,
}

impl ScriptedRandom {
    /// Creates a source that yields `draws` in order.
    pub fn new<I: IntoIterator<Item = u32>>(draws: I) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn below(&self, bound: u32) -> u32 {
        let mut last = self.last.lock();
        if let Some(next) = self.draws.lock().pop_front() {
            *last = next;
        }
        *last % bound
    }
}
