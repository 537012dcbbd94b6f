// src/executor/mod.rs

//! Worker-pool abstraction for independently parallelizable work.
//!
//! Metadata queries, signature checks and per-PID install simulations have
//! no ordering dependency on each other, so callers map them over an
//! [`Executor`] chosen at construction time. Tests and debugging use
//! [`Serial`]; real builds use [`Parallel`].

use rayon::prelude::*;

/// Maps a function over a collection of work items.
pub trait Executor {
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send;
}

/// Runs work items on the rayon thread pool, sized to available cores.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl Executor for Parallel {
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        items.into_par_iter().map(f).collect()
    }
}

/// Runs work items inline on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Serial;

impl Executor for Serial {
    fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        items.into_iter().map(f).collect()
    }
}
