//! The storage command worker (C6): serializes every card access behind a
//! single queue so the DSP/logger tasks never block on the SD card.
//!
//! Grounded on `storage.c`'s `storage_task_proc`/`xQueueSendToBack` pair: a
//! bounded queue carries commands to one consumer task, each command
//! optionally carrying a [`Future`] the caller polls for completion. The
//! original passes a raw `future_t*` through the queue and completes it from
//! the consumer task; [`QueuedRequest`] keeps that same pointer-passing
//! shape (see the safety note on [`Worker::run_pending`]) rather than
//! introducing reference-counting this single-core, single-consumer design
//! has no use for.

pub mod comtrade;
pub mod csv;
pub mod event;
pub mod fs;
pub mod trend;

use heapless::spsc::Queue;

use crate::error::{Error, Result};
use crate::future::Future;
use crate::logger::Event;
use crate::oscillogram::Oscillogram;

/// One command the storage worker can execute.
pub enum Request {
    ReadConf,
    WriteEvent(Event),
    TrendStart,
    TrendStop,
    /// Flushes the currently-open trend buffer to disk without stopping
    /// recording (mirrors `trends_sync`'s mid-run checkpoint).
    TrendSync,
}

struct QueuedRequest {
    request: Request,
    /// `None` for fire-and-forget commands; otherwise a pointer to the
    /// caller's `Future`, completed once the command runs.
    ///
    /// A raw pointer rather than a reference because the future outlives the
    /// queued item only by caller contract (the caller must not drop or move
    /// it before polling `done()`), the same contract `storage.c`'s
    /// `future_t*` relies on; see [`Worker::run_pending`] for the safety
    /// argument at the one place this pointer is dereferenced.
    future: Option<*const Future>,
}

/// Executes one storage [`Request`] against the concrete card/filesystem
/// stack. Implemented by the board integration; [`Worker`] is generic over
/// it so this crate's core stays free of any filesystem type.
///
/// `write_event`/`sync_trend` take the live [`Oscillogram`]/
/// [`crate::storage::trend::Recorder`] by reference rather than a copy
/// carried through the queue, mirroring the original's `event_write`
/// reading the live `osc_*` singleton directly (see
/// [`crate::storage::event`]'s module doc) — [`Request::WriteEvent`] still
/// carries only the lightweight [`Event`], matching `storage_cmd_wr_event_t`.
pub trait StorageBackend<const EVENT_POOL: usize, const N_OSC: usize, const TREND_POOL: usize, const TREND_BUFFERS: usize> {
    fn read_conf(&mut self) -> Result<()>;
    fn write_event(&mut self, event: &Event, osc: &Oscillogram<EVENT_POOL, N_OSC>) -> Result<()>;
    fn start_trend(&mut self) -> Result<()>;
    fn stop_trend(&mut self) -> Result<()>;
    fn sync_trend(&mut self, trends: &mut crate::storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>) -> Result<()>;
}

/// The bounded single-producer/single-consumer command queue between the
/// logger and the storage backend.
pub struct Worker<const QUEUE: usize> {
    queue: Queue<QueuedRequest, QUEUE>,
}

impl<const QUEUE: usize> Worker<QUEUE> {
    pub const fn new() -> Self {
        Self { queue: Queue::new() }
    }

    fn enqueue(&mut self, request: Request, future: Option<&Future>) -> Result<()> {
        let item = QueuedRequest {
            request,
            future: future.map(|f| f as *const Future),
        };
        self.queue.enqueue(item).map_err(|_| Error::OutOfMemory)
    }

    /// Submits a fire-and-forget command with no completion future.
    pub fn submit(&mut self, request: Request) -> Result<()> {
        self.enqueue(request, None)
    }

    /// Submits a command and arms `future` to track its completion,
    /// mirroring `storage_read_conf`/`storage_write_event`'s
    /// `future_start` before enqueue. If the queue is full, `future` is
    /// failed immediately with [`Error::OutOfMemory`] (matching the
    /// original's `xQueueSendToBack` failure path) rather than left
    /// pending forever.
    pub fn submit_tracked(&mut self, request: Request, future: &Future) -> Result<()> {
        future.start();
        match self.enqueue(request, Some(future)) {
            Ok(()) => Ok(()),
            Err(err) => {
                future.finish(Err(err));
                Err(err)
            }
        }
    }

    /// `true` while a request is waiting to be run.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Runs exactly one queued request against `backend`, completing its
    /// future if it has one. Returns `false` if the queue was empty.
    ///
    /// `event_osc`/`trends` are the same live buffers the logger appends to
    /// and pauses; the caller (the board integration's lowest-priority
    /// task) locks them alongside `backend` for the duration of this call.
    ///
    /// Intended to be called from the single storage task on every tick
    /// (`storage_task_proc`'s `xQueueReceive` loop, one iteration).
    pub fn run_pending<const EVENT_POOL: usize, const N_OSC: usize, const TREND_POOL: usize, const TREND_BUFFERS: usize>(
        &mut self,
        backend: &mut impl StorageBackend<EVENT_POOL, N_OSC, TREND_POOL, TREND_BUFFERS>,
        event_osc: &Oscillogram<EVENT_POOL, N_OSC>,
        trends: &mut crate::storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>,
    ) -> bool {
        let Some(item) = self.queue.dequeue() else {
            return false;
        };

        let result = match &item.request {
            Request::ReadConf => backend.read_conf(),
            Request::WriteEvent(event) => backend.write_event(event, event_osc),
            Request::TrendStart => backend.start_trend(),
            Request::TrendStop => backend.stop_trend(),
            Request::TrendSync => backend.sync_trend(trends),
        };

        if let Some(future) = item.future {
            // SAFETY: `future` was submitted by `submit_tracked`, which
            // requires the caller to keep the `Future` alive and not poll
            // it concurrently with this worker until `done()` is observed
            // true; the queue carries at most one in-flight pointer to any
            // given future (the caller awaits completion before reusing it,
            // the same single-outstanding-command discipline the original
            // firmware's `future_t*` usage follows).
            unsafe { (*future).finish(result) };
        }

        true
    }
}

impl<const QUEUE: usize> Default for Worker<QUEUE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Timestamp;

    struct CountingBackend {
        read_conf: u32,
        write_event: u32,
        start_trend: u32,
        stop_trend: u32,
        sync_trend: u32,
        fail_next: bool,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                read_conf: 0,
                write_event: 0,
                start_trend: 0,
                stop_trend: 0,
                sync_trend: 0,
                fail_next: false,
            }
        }
    }

    impl StorageBackend<8, 1, 8, 1> for CountingBackend {
        fn read_conf(&mut self) -> Result<()> {
            self.read_conf += 1;
            if self.fail_next {
                self.fail_next = false;
                return Err(Error::IoError);
            }
            Ok(())
        }
        fn write_event(&mut self, _event: &Event, _osc: &Oscillogram<8, 1>) -> Result<()> {
            self.write_event += 1;
            Ok(())
        }
        fn start_trend(&mut self) -> Result<()> {
            self.start_trend += 1;
            Ok(())
        }
        fn stop_trend(&mut self) -> Result<()> {
            self.stop_trend += 1;
            Ok(())
        }
        fn sync_trend(&mut self, _trends: &mut crate::storage::trend::Recorder<8, 1, 1>) -> Result<()> {
            self.sync_trend += 1;
            Ok(())
        }
    }

    fn fixtures() -> (Oscillogram<8, 1>, crate::storage::trend::Recorder<8, 1, 1>) {
        (
            Oscillogram::new(crate::oscillogram::WrapMode::Wrap),
            crate::storage::trend::Recorder::new(),
        )
    }

    #[test]
    fn tracked_request_completes_future_with_backend_result() {
        let mut worker: Worker<4> = Worker::new();
        let mut backend = CountingBackend::new();
        let future = Future::new();
        let (osc, mut trends) = fixtures();

        worker.submit_tracked(Request::ReadConf, &future).unwrap();
        assert!(!future.done());

        assert!(worker.run_pending(&mut backend, &osc, &mut trends));
        assert!(future.done());
        assert_eq!(future.result(), Ok(()));
        assert_eq!(backend.read_conf, 1);
    }

    #[test]
    fn tracked_request_propagates_backend_error() {
        let mut worker: Worker<4> = Worker::new();
        let mut backend = CountingBackend::new();
        backend.fail_next = true;
        let future = Future::new();
        let (osc, mut trends) = fixtures();

        worker.submit_tracked(Request::ReadConf, &future).unwrap();
        worker.run_pending(&mut backend, &osc, &mut trends);

        assert_eq!(future.result(), Err(Error::IoError));
    }

    #[test]
    fn full_queue_fails_future_immediately_without_enqueueing() {
        let mut worker: Worker<1> = Worker::new();
        let mut backend = CountingBackend::new();
        let blocker = Future::new();
        let (osc, mut trends) = fixtures();
        worker.submit_tracked(Request::ReadConf, &blocker).unwrap();

        let overflow = Future::new();
        let err = worker.submit_tracked(Request::TrendSync, &overflow).unwrap_err();
        assert_eq!(err, Error::OutOfMemory);
        assert!(overflow.done());
        assert_eq!(overflow.result(), Err(Error::OutOfMemory));

        assert!(worker.run_pending(&mut backend, &osc, &mut trends));
        assert!(!worker.run_pending(&mut backend, &osc, &mut trends));
        assert_eq!(backend.read_conf, 1);
    }

    #[test]
    fn untracked_requests_run_without_a_future() {
        let mut worker: Worker<4> = Worker::new();
        let mut backend = CountingBackend::new();
        let (osc, mut trends) = fixtures();

        worker.submit(Request::WriteEvent(Event {
            time: Timestamp::new(0, 0),
            trigger: None,
        }))
        .unwrap();
        assert!(worker.run_pending(&mut backend, &osc, &mut trends));
        assert_eq!(backend.write_event, 1);
    }
}
