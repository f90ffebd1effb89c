//! On-target firmware entry point: wires `comtrade_logger`'s hardware
//! boundary ([`comtrade_logger::hal`]) to a concrete board, and drives the
//! [`comtrade_logger::Recorder`] composition root from RTIC tasks.
//!
//! # Scope
//!
//! Pin assignment, clock tree setup, ADC/DMA configuration and the SD card's
//! SPI/SDIO bus are this crate's explicit hardware boundary (see
//! `comtrade_logger::hal`'s module doc) and are **not** implemented here:
//! `board` below is the seam a concrete target (a board support crate
//! depending on this one, adding the matching PAC/HAL to its own
//! `Cargo.toml`) fills in. What this file shows is the task/priority
//! structure around that seam, grounded on the original firmware's
//! `logger_task`/`storage_task`/ADC-DMA-ISR split and generalized from
//! FreeRTOS tasks onto `cortex-m-rtic`'s priority-ceiling scheduler.
#![no_std]
#![no_main]

use comtrade_logger::hal::{AdcFrame, Level};
use comtrade_logger::oscillogram::Oscillogram;
use comtrade_logger::storage::fs::{Directory, NullFs};
use comtrade_logger::storage::StorageBackend;
use comtrade_logger::{error, logger, q15, storage, Recorder};
use fugit::ExtU64;
use systick_monotonic::Systick;

/// Statically-sized channel counts for this board revision. A different
/// board picks different consts; nothing downstream of [`Recorder`] assumes
/// any particular value.
const N_AIN: usize = 4;
const N_DIN: usize = 4;
const N_OSC: usize = 8;
const N_TRIG: usize = 4;
const EVENT_POOL: usize = 8 * 4096;
const TREND_POOL: usize = 8 * 1024;
const TREND_BUFFERS: usize = 3;
const STORAGE_QUEUE: usize = 4;

/// Scheduler period for the digital/trigger/logger tick, matching the
/// original's 1 ms `logger_task` cadence.
const TICK_MICROS: u64 = 1_000;
const TICK_DT: q15::Q15 = q15::q15(0.001);

/// Fixed COMTRADE identity/rate fields for this skeleton. A board
/// integration sources these from `config::Settings`/`Logger` instead (see
/// `Backend::read_conf`'s doc comment).
const STATION_NAME: &str = "Station 1";
const DEV_ID: &str = "REC-0001";
const LINE_FREQUENCY_HZ: f32 = 50.0;
const SAMPLE_RATE_HZ: f32 = 1600.0;

/// One trend file per five minutes of continuous recording.
const TREND_LIMIT_SECONDS: usize = 300;
/// Trend files older than 30 days are deleted on every rollover.
const TREND_RETENTION_SECS: i64 = 30 * 24 * 60 * 60;
const TREND_RETENTION_MAX: usize = 64;

type AppRecorder = Recorder<N_AIN, N_DIN, N_OSC, N_TRIG, EVENT_POOL, TREND_POOL, TREND_BUFFERS, STORAGE_QUEUE>;

/// Board bring-up boundary: the concrete GPIO/RTC/SD-card wiring a real
/// target supplies. Every method here is a placeholder that panics if ever
/// actually called — this module exists to show where the board
/// integration's real types plug into the RTIC resources below, not to run
/// on hardware itself.
mod board {
    use comtrade_logger::hal::{DigitalInputs, DigitalOutputs, Level, Timestamp, WallClock};

    /// Stands in for the board's real PAC crate (e.g. `stm32h7xx_hal::pac`),
    /// which `rtic::app`'s `device` argument needs for its interrupt vector
    /// table and priority-bits constant. A board integration depends on
    /// that crate directly and points `device` at it instead of this stub.
    pub mod pac {}

    pub struct RawDigitalInputs;
    impl DigitalInputs for RawDigitalInputs {
        fn channel_count(&self) -> usize {
            super::N_DIN
        }
        fn read(&self, _index: usize) -> Level {
            unimplemented!("board integration reads its own GPIO input pins here")
        }
    }

    pub struct DigitalOutputPins;
    impl DigitalOutputs for DigitalOutputPins {
        fn set_run(&mut self, _level: Level) {
            unimplemented!("board integration drives its RUN output pin here")
        }
        fn set_error(&mut self, _level: Level) {
            unimplemented!("board integration drives its ERROR output pin here")
        }
        fn set_event(&mut self, _level: Level) {
            unimplemented!("board integration drives its EVENT output pin here")
        }
    }

    pub struct Rtc;
    impl WallClock for Rtc {
        fn now(&self) -> Timestamp {
            unimplemented!("board integration reads its RTC peripheral here")
        }
        fn set(&mut self, _time: Timestamp) {
            unimplemented!("board integration writes its RTC peripheral here")
        }
    }
}

/// Bridges the storage worker's [`StorageBackend`] trait to the
/// filesystem-level [`comtrade_logger::storage::fs::Directory`]. Mounted on
/// [`NullFs`] here since no concrete SD card driver is wired up in this
/// skeleton; a board swaps this for [`comtrade_logger::storage::fs::SdmmcFs`].
///
/// Owns only the bookkeeping a trend file needs across repeated `sync_trend`
/// calls (which file is currently open, and the sample-count-based rollover
/// limit derived from it); the samples themselves live in the `Recorder`'s
/// own [`Oscillogram`]/`trend::Recorder`, passed in by reference on each
/// call (see [`StorageBackend`]'s doc comment).
struct Backend<D> {
    dir: D,
    trend_file: Option<heapless::String<storage::trend::FILENAME_LEN>>,
    trend_limit_samples: usize,
}

impl<D> Backend<D> {
    fn new(dir: D) -> Self {
        Self {
            dir,
            trend_file: None,
            trend_limit_samples: storage::trend::samples_for_limit(SAMPLE_RATE_HZ, TREND_LIMIT_SECONDS),
        }
    }

    fn identity(&self) -> storage::event::Identity<'static> {
        storage::event::Identity {
            station_name: STATION_NAME,
            dev_id: DEV_ID,
            line_frequency_hz: LINE_FREQUENCY_HZ,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}

impl<D: Directory> Backend<D> {
    /// Writes whatever the current trend buffer has committed since the
    /// file now open was started, rolling to a fresh file once either the
    /// configured size limit or the buffer's own pool capacity is reached
    /// (`split_for_rollover`/`base_name`, mirroring `trends_sync`).
    fn flush_trend(&mut self, trends: &mut storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>) -> error::Result<()> {
        let committed = trends.current().committed_count();
        if committed == 0 {
            return Ok(());
        }

        let start_time = trends.current().start_time().unwrap_or_default();
        let stem = self
            .trend_file
            .get_or_insert_with(|| storage::trend::base_name(start_time))
            .clone();

        let identity = self.identity();
        let split = storage::trend::split_for_rollover(0, self.trend_limit_samples, committed);
        let write_len = if split.rolls_over { split.first } else { committed };

        let source = storage::event::BufferSource::new(trends.current(), 0..write_len, None, &identity);
        storage::event::write_buffer_files(&mut self.dir, stem.as_str(), &source, start_time, start_time)?;

        if split.rolls_over || trends.current().full() {
            trends.resume();
            self.trend_file = None;
            storage::trend::remove_outdated::<TREND_RETENTION_MAX>(&mut self.dir, start_time, TREND_RETENTION_SECS)?;
        }
        Ok(())
    }
}

impl<D: Directory> StorageBackend<EVENT_POOL, N_OSC, TREND_POOL, TREND_BUFFERS> for Backend<D> {
    fn read_conf(&mut self) -> error::Result<()> {
        // Config parsing (`config::Settings::parse` over `config.ini`) and
        // publishing the result back into `Logger`/`Recorder::settings`
        // happens one level up, in the board integration owning both
        // `Shared::recorder` and `Shared::backend`; this trait's narrow
        // surface only reaches the filesystem.
        Ok(())
    }

    fn write_event(&mut self, event: &logger::Event, osc: &Oscillogram<EVENT_POOL, N_OSC>) -> error::Result<()> {
        let identity = self.identity();
        storage::event::write_event(&mut self.dir, osc, event, &identity)
    }

    fn start_trend(&mut self) -> error::Result<()> {
        self.trend_file = None;
        Ok(())
    }

    fn stop_trend(&mut self) -> error::Result<()> {
        self.trend_file = None;
        Ok(())
    }

    fn sync_trend(&mut self, trends: &mut storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>) -> error::Result<()> {
        self.flush_trend(trends)
    }
}

#[rtic::app(device = board::pac, dispatchers = [EXTI0, EXTI1, EXTI2])]
mod app {
    use super::*;

    #[monotonic(binds = SysTick, default = true)]
    type Tick = Systick<1_000>;

    #[shared]
    struct Shared {
        recorder: AppRecorder,
        backend: Backend<NullFs>,
    }

    #[local]
    struct Local {
        raw_digital: board::RawDigitalInputs,
        outputs: board::DigitalOutputPins,
        clock: board::Rtc,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        #[cfg(feature = "rtt")]
        super::init_logging();

        let mono = Systick::new(cx.core.SYST, 0);

        let shared = Shared {
            recorder: AppRecorder::new(),
            backend: Backend::new(NullFs),
        };
        let local = Local {
            raw_digital: board::RawDigitalInputs,
            outputs: board::DigitalOutputPins,
            clock: board::Rtc,
        };

        tick::spawn_after(TICK_MICROS.micros()).ok();
        storage_worker::spawn().ok();

        (shared, local, init::Monotonics(mono))
    }

    /// The 1 ms logger cadence: digital debounce, trigger evaluation, and
    /// the top-level state machine (`Recorder::tick`). Priority 2, above
    /// the storage worker so a slow card write never delays trigger
    /// detection (mirrors the original's `LOGGER_PRIORITY >
    /// STORAGE_PRIORITY`).
    #[task(shared = [recorder], local = [raw_digital, clock], priority = 2)]
    fn tick(mut cx: tick::Context) {
        let now = cx.local.clock.now();
        cx.shared.recorder.lock(|recorder| {
            recorder.tick(cx.local.raw_digital, now, TICK_DT);
        });
        update_outputs::spawn().ok();
        tick::spawn_after(TICK_MICROS.micros()).ok();
    }

    /// Reflects `logger.state()` onto the RUN/ERROR/EVENT output pins.
    /// Split out from `tick` so it can run at a lower priority without
    /// delaying the next trigger evaluation.
    #[task(shared = [recorder], local = [outputs], priority = 1)]
    fn update_outputs(mut cx: update_outputs::Context) {
        let (state, halt_done) = cx
            .shared
            .recorder
            .lock(|recorder| (recorder.logger.state(), recorder.logger.halt_done()));
        let (run, error, event) = match state {
            logger::State::NoInit => (Level::Low, Level::Low, Level::Low),
            logger::State::Run => (Level::High, Level::Low, Level::Low),
            logger::State::Event => (Level::High, Level::Low, Level::High),
            logger::State::Error => (Level::Low, Level::High, Level::Low),
            // RUN stays asserted through Halt until its trend-sync
            // sub-state machine reaches Done.
            logger::State::Halt => (if halt_done { Level::Low } else { Level::High }, Level::Low, Level::Low),
        };
        cx.local.outputs.set_run(run);
        cx.local.outputs.set_error(error);
        cx.local.outputs.set_event(event);
    }

    /// The ADC-DMA completion handler. Bound to a real interrupt by the
    /// board integration (the `dispatchers` list above are placeholders
    /// standing in for that vector); decimates and forwards each frame
    /// into the analog frontend. Highest priority: sample timing jitter
    /// here propagates directly into the RMS/peak windows.
    #[task(shared = [recorder], priority = 3, capacity = 4)]
    fn adc_frame_ready(mut cx: adc_frame_ready::Context, frame: AdcFrame<N_AIN>) {
        cx.shared.recorder.lock(|recorder| {
            recorder.process_analog_frame(&frame);
        });
    }

    /// Drains the storage command queue, one request per wakeup (mirrors
    /// `storage_task_proc`'s `xQueueReceive` loop). Lowest priority: SD
    /// card latency must never preempt sampling or triggering.
    #[task(shared = [recorder, backend], priority = 1)]
    fn storage_worker(mut cx: storage_worker::Context) {
        let ran = (&mut cx.shared.recorder, &mut cx.shared.backend).lock(|recorder, backend| {
            recorder
                .storage
                .run_pending(backend, &recorder.event_osc, &mut recorder.trends)
        });

        let delay = if ran { 0.micros() } else { 500.micros() };
        storage_worker::spawn_after(delay).ok();
    }
}

#[cfg(feature = "rtt")]
fn init_logging() {
    rtt_target::rtt_init_print!();
    static LOGGER: rtt_logger::RTTLogger = rtt_logger::RTTLogger::new(log::LevelFilter::Info);
    log::set_logger(&LOGGER).ok();
    log::set_max_level(log::LevelFilter::Info);
}
