//! Tournament merger.

use log;

use crate::pool::BufferPool;
use crate::run::{Run, RunIterator};
use crate::sort::SortError;

/// Selection (tournament) merger implementation.
/// Merges multiple sorted runs into a single sorted output by repeatedly scanning the live iterators for
/// the smallest current value. Time complexity is *m* \* *k* where *m* is the number of values
/// and *k* is the number of runs. Ties go to the first run in input order.
pub struct TournamentMerger<'a> {
    /// Iterators still holding a value, in run order.
    live: Vec<RunIterator<'a>>,
}

impl<'a> TournamentMerger<'a> {
    /// Opens one iterator per run, run `i` bound to buffer slot `i`, and primes each with its first value.
    /// Runs should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `pool` - Buffer pool the runs are read through
    /// * `runs` - Runs to be merged, at most `pool.size() - 1` of them
    pub fn new(pool: &mut BufferPool, runs: &'a [Run]) -> Result<Self, SortError> {
        let fan_in = pool.size() - 1;
        if runs.len() > fan_in {
            return Err(SortError::FanInExceeded {
                runs: runs.len(),
                fan_in,
            });
        }

        let mut live = Vec::with_capacity(runs.len());
        for (buffer_index, run) in runs.iter().enumerate() {
            let mut iter = run.iterator(buffer_index);
            iter.open(pool)?;
            if iter.has_next(pool)? {
                iter.next(pool)?;
                live.push(iter);
            } else {
                iter.close();
            }
        }

        return Ok(TournamentMerger { live });
    }

    /// Returns `(buffer slot, current value)` of every run that still holds a value, in run order.
    pub fn heads(&self) -> Vec<(usize, i32)> {
        self.live
            .iter()
            .filter_map(|iter| iter.current().map(|value| (iter.buffer_index(), value)))
            .collect()
    }

    /// Returns the next value in ascending order, [`None`] once every run is drained.
    pub fn next_value(&mut self, pool: &mut BufferPool) -> Result<Option<i32>, SortError> {
        let mut winner: Option<(usize, i32)> = None;
        for (idx, iter) in self.live.iter().enumerate() {
            if let Some(value) = iter.current() {
                match winner {
                    Some((_, min)) if value >= min => {}
                    _ => winner = Some((idx, value)),
                }
            }
        }

        let (idx, value) = match winner {
            Some(winner) => winner,
            None => return Ok(None),
        };

        let iter = &mut self.live[idx];
        if iter.has_next(pool)? {
            iter.next(pool)?;
        } else {
            iter.close();
            self.live.remove(idx);
        }

        return Ok(Some(value));
    }
}

/// Merges a group of runs into a new run.
pub fn merge_runs(pool: &mut BufferPool, runs: &[Run]) -> Result<Run, SortError> {
    log::debug!("merging {} runs", runs.len());

    let merged = Run::new(pool)?;
    let mut merger = TournamentMerger::new(pool, runs)?;
    while let Some(value) = merger.next_value(pool)? {
        merged.add_field(pool, value)?;
    }
    merged.flush(pool)?;

    return Ok(merged);
}

/// Concatenates runs in order into a new run, reading them one after another through slot 0.
/// The result is sorted only if the runs form one ascending sequence.
pub fn concat_runs(pool: &mut BufferPool, runs: &[Run]) -> Result<Run, SortError> {
    log::debug!("concatenating {} runs", runs.len());

    let concatenated = Run::new(pool)?;
    for run in runs {
        let mut iter = run.iterator(0);
        iter.open(pool)?;
        while iter.has_next(pool)? {
            let value = iter.next(pool)?;
            concatenated.add_field(pool, value)?;
        }
        iter.close();
    }
    concatenated.flush(pool)?;

    return Ok(concatenated);
}
