//! Trend recording (supplements C3/C6): a continuously-running, file-
//! rotating companion to the event oscillogram.
//!
//! Grounded on the original firmware's `trends.c`. Where the event
//! oscillogram pauses on trigger and is read once, a trend recorder never
//! stops: it cycles through a small ring of [`WrapMode::Stop`] buffers
//! (`BufferInRing`, per [`crate::oscillogram`]'s redesign note), handing
//! each full buffer to the storage worker to flush while recording
//! continues into the next one (`trends_resume`'s `osc_buffer_resume` +
//! `osc_next_buffer` pair).

use heapless::String;

use crate::hal::Timestamp;
use crate::oscillogram::{Oscillogram, ValueSource, WrapMode};

pub const FILENAME_LEN: usize = 32;

/// Below this many samples, a rollover boundary would create a file too
/// small to be useful; `set_limit` clamps up to it.
const LIMIT_SAMPLES_MIN: usize = 10;

/// Builds a trend file's base name from its start time:
/// `trend_DD.MM.YYYY_HH-MM-SS`. Months and days are 1-based (resolving the
/// original's inconsistent 0-/1-based month encoding).
pub fn base_name(start: Timestamp) -> String<FILENAME_LEN> {
    super::fs::timestamped_name("trend_", start)
}

/// Converts a per-file sample limit given in seconds into a sample count at
/// `sample_rate_hz`, clamped to [`LIMIT_SAMPLES_MIN`]. `0` means unlimited.
pub fn samples_for_limit(sample_rate_hz: f32, limit_seconds: usize) -> usize {
    if limit_seconds == 0 {
        return 0;
    }
    let samples = (sample_rate_hz * limit_seconds as f32) as usize;
    samples.max(LIMIT_SAMPLES_MIN)
}

/// How a chunk of newly-committed samples splits across a file-size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverSplit {
    /// Samples to append to the file currently open.
    pub first: usize,
    /// `true` if the limit was reached and a new file must be started
    /// before writing `second`.
    pub rolls_over: bool,
    /// Samples to write to the new file, if `rolls_over`.
    pub second: usize,
}

/// Splits `chunk_len` new samples against `samples_in_file` already written
/// and a `limit_samples` cap (`0` = unlimited).
pub fn split_for_rollover(samples_in_file: usize, limit_samples: usize, chunk_len: usize) -> RolloverSplit {
    if limit_samples == 0 || samples_in_file + chunk_len < limit_samples {
        return RolloverSplit {
            first: chunk_len,
            rolls_over: false,
            second: 0,
        };
    }
    let first = limit_samples.saturating_sub(samples_in_file);
    RolloverSplit {
        first,
        rolls_over: true,
        second: chunk_len - first,
    }
}

use super::fs::Directory;

/// Deletes every trend file whose modification time plus `outdate_secs` has
/// passed relative to `now`. `outdate_secs <= 0` disables retention.
///
/// Grounded on `trends_remove_outdated`'s `f_findfirst`/`f_unlink` loop,
/// restructured to collect stale names first: visiting and removing in the
/// same pass would require two concurrent mutable borrows of the directory.
pub fn remove_outdated<const MAX: usize>(
    dir: &mut impl Directory,
    now: Timestamp,
    outdate_secs: i64,
) -> crate::error::Result<()> {
    if outdate_secs <= 0 {
        return Ok(());
    }

    let mut stale: heapless::Vec<String<FILENAME_LEN>, MAX> = heapless::Vec::new();
    dir.for_each_trend_file(&mut |name, mtime| {
        if mtime.secs + outdate_secs <= now.secs {
            let mut s: String<FILENAME_LEN> = String::new();
            for c in name.chars() {
                if s.push(c).is_err() {
                    break;
                }
            }
            let _ = stale.push(s);
        }
    })?;

    for name in stale.iter() {
        dir.remove(name.as_str())?;
    }
    Ok(())
}

/// A ring of `Stop`-mode oscillogram buffers recording continuously: one is
/// always "current" and accepting samples while the others wait to be
/// flushed to disk (`BufferInRing`, per the original's multi-buffer
/// revision).
pub struct Recorder<const POOL: usize, const N: usize, const BUFFERS: usize> {
    buffers: [Oscillogram<POOL, N>; BUFFERS],
    current: usize,
    running: bool,
}

impl<const POOL: usize, const N: usize, const BUFFERS: usize> Recorder<POOL, N, BUFFERS> {
    pub const fn new() -> Self {
        Self {
            buffers: [const { Oscillogram::new(WrapMode::Stop) }; BUFFERS],
            current: 0,
            running: false,
        }
    }

    pub fn current(&self) -> &Oscillogram<POOL, N> {
        &self.buffers[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Oscillogram<POOL, N> {
        &mut self.buffers[self.current]
    }

    pub fn buffer(&self, index: usize) -> &Oscillogram<POOL, N> {
        &self.buffers[index]
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn reset(&mut self) {
        for buf in &mut self.buffers {
            buf.reset();
        }
        self.current = 0;
        self.running = false;
    }

    /// Appends one tick's sample if running, or if a pause initiated before
    /// stopping is still draining its post-trigger tail (mirrors
    /// `trends_append`'s "still flush a pending pause while stopped" path).
    pub fn append(&mut self, source: &impl ValueSource, now: Timestamp) {
        if !self.running && !self.current().paused() {
            return;
        }
        self.current_mut().append(source, now);
    }

    pub fn pause(&mut self, post_trigger_samples: usize) {
        self.current_mut().pause(post_trigger_samples);
    }

    pub fn paused(&self) -> bool {
        self.current().paused()
    }

    /// Hands the current buffer off for flushing and advances to the next
    /// slot in the ring, clearing it for fresh recording.
    pub fn resume(&mut self) {
        self.current_mut().resume();
        self.current = (self.current + 1) % BUFFERS;
        self.current_mut().clear();
    }
}

impl<const POOL: usize, const N: usize, const BUFFERS: usize> Default for Recorder<POOL, N, BUFFERS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_uses_one_based_day_and_month() {
        let name = base_name(Timestamp::new(1_785_587_696, 0));
        assert_eq!(name.as_str(), "trend_01.08.2026_12-34-56");
    }

    #[test]
    fn samples_for_limit_clamps_to_minimum() {
        assert_eq!(samples_for_limit(1600.0, 0), 0);
        assert_eq!(samples_for_limit(1.0, 1), LIMIT_SAMPLES_MIN);
        assert_eq!(samples_for_limit(1600.0, 10), 16000);
    }

    #[test]
    fn split_for_rollover_fits_chunk_when_under_limit() {
        let split = split_for_rollover(0, 100, 50);
        assert_eq!(split, RolloverSplit { first: 50, rolls_over: false, second: 0 });
    }

    #[test]
    fn split_for_rollover_divides_chunk_at_limit() {
        let split = split_for_rollover(90, 100, 30);
        assert_eq!(split, RolloverSplit { first: 10, rolls_over: true, second: 20 });
    }

    struct FakeDir {
        entries: heapless::Vec<(String<32>, Timestamp), 8>,
        removed: heapless::Vec<String<32>, 8>,
    }
    impl Directory for FakeDir {
        fn with_file<R>(
            &mut self,
            _name: &str,
            _body: &mut dyn FnMut(&mut dyn crate::storage::fs::WriteFile) -> crate::error::Result<R>,
        ) -> crate::error::Result<R> {
            unreachable!("not exercised by trend retention tests")
        }

        fn for_each_trend_file(&mut self, visit: &mut dyn FnMut(&str, Timestamp)) -> crate::error::Result<()> {
            for (name, time) in self.entries.iter() {
                visit(name.as_str(), *time);
            }
            Ok(())
        }
        fn remove(&mut self, name: &str) -> crate::error::Result<()> {
            let mut s: String<32> = String::new();
            for c in name.chars() {
                let _ = s.push(c);
            }
            let _ = self.removed.push(s);
            Ok(())
        }
    }

    #[test]
    fn removes_only_files_older_than_outdate_window() {
        let mut fresh: String<32> = String::new();
        let _ = fresh.push_str("trend_fresh");
        let mut old: String<32> = String::new();
        let _ = old.push_str("trend_old");

        let mut dir = FakeDir {
            entries: heapless::Vec::new(),
            removed: heapless::Vec::new(),
        };
        dir.entries.push((fresh, Timestamp::new(1000, 0))).unwrap();
        dir.entries.push((old, Timestamp::new(0, 0))).unwrap();

        remove_outdated::<8>(&mut dir, Timestamp::new(1000, 0), 500).unwrap();

        assert_eq!(dir.removed.len(), 1);
        assert_eq!(dir.removed[0].as_str(), "trend_old");
    }

    #[test]
    fn zero_outdate_disables_retention() {
        let mut dir = FakeDir {
            entries: heapless::Vec::new(),
            removed: heapless::Vec::new(),
        };
        let mut name: String<32> = String::new();
        let _ = name.push_str("trend_x");
        dir.entries.push((name, Timestamp::new(0, 0))).unwrap();

        remove_outdated::<8>(&mut dir, Timestamp::new(100_000, 0), 0).unwrap();
        assert!(dir.removed.is_empty());
    }
}
