//! A power-quality disturbance recorder: decimated analog/digital sampling,
//! threshold-dwell triggering, COMTRADE/CSV event capture, and continuous
//! trend recording, built around a small fixed-point DSP core for
//! microcontroller targets with no floating-point hardware in the hot path.
//!
//! `#![no_std]`, like the board firmware this crate is the Rust
//! reimplementation of: every module is generic over channel counts and
//! hardware traits ([`hal`]) so the board integration (`src/bin/recorder.rs`)
//! supplies the concrete ADC/GPIO/SD-card wiring and this crate stays
//! portable across boards.
//!
//! Module map, bottom-up:
//! - [`q15`] — fixed-point arithmetic every other module builds on.
//! - [`future`] — the one-shot completion cell connecting the logger to the
//!   storage worker.
//! - [`hal`] — the hardware boundary: clock, digital I/O, ADC frames.
//! - [`error`] — the shared `Result`/`Error` taxonomy.
//! - [`config`] — `config.ini` parsing into [`config::Settings`].
//! - [`dsp`] — the analog frontend: decimation, RMS/peak windows.
//! - [`digital`] — debounced digital inputs and their RESET/HALT tagging.
//! - [`oscillogram`] — the pool-backed waveform buffer shared by event
//!   capture and trend recording.
//! - [`trigger`] — threshold-dwell trigger channels.
//! - [`logger`] — the top-level `NoInit ⇄ Run ⇄ Event`/`Error`/`Halt` state
//!   machine, reached only through the [`logger::Context`] trait.
//! - [`storage`] — the single-consumer command queue to the SD card, and the
//!   COMTRADE/CSV writers it drives.
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod digital;
pub mod dsp;
pub mod error;
pub mod future;
pub mod hal;
pub mod logger;
pub mod oscillogram;
pub mod q15;
pub mod storage;
pub mod trigger;

use hal::{DigitalInputs, Level, Timestamp};
use logger::{Context, Event};
use q15::Q15;

/// Until [`config::Settings`] grows a sampling-rate/line-frequency pair to
/// derive it from, the effective-value window length is this placeholder;
/// the board integration is expected to call
/// [`dsp::AnalogChannel::reset`] itself with the real `sample_freq /
/// line_freq` once those settings exist.
const DEFAULT_WINDOW_SAMPLES: usize = 32;

/// Bundles the live analog frontend and digital input bank behind the
/// single [`trigger::TriggerSource`]/[`oscillogram::ValueSource`] surface
/// both the trigger engine and every oscillogram buffer read from.
///
/// The original keeps these as two free-standing module singletons wired
/// together by four function pointers per consumer (`osc_data_t`,
/// `trig_data_t`); this folds them into one composition-root field
/// instead, so there is exactly one place live channel state lives.
pub struct Frontend<const N_AIN: usize, const N_DIN: usize> {
    pub analog: dsp::AnalogFrontend<N_AIN>,
    pub digital: digital::InputBank<N_DIN>,
}

impl<const N_AIN: usize, const N_DIN: usize> Frontend<N_AIN, N_DIN> {
    pub const fn new() -> Self {
        Self {
            analog: dsp::AnalogFrontend::new(1),
            digital: digital::InputBank::new(),
        }
    }

    /// Advances digital debounce by `dt`; analog channels advance through
    /// [`Frontend::process_frame`] instead, since they're driven by ADC-DMA
    /// frames rather than a fixed tick.
    pub fn tick_digital(&mut self, raw: &impl DigitalInputs, dt: Q15) {
        self.digital.process(raw, dt);
    }

    pub fn process_frame(&mut self, frame: &hal::AdcFrame<N_AIN>) -> bool {
        self.analog.process_frame(frame)
    }
}

impl<const N_AIN: usize, const N_DIN: usize> Default for Frontend<N_AIN, N_DIN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N_AIN: usize, const N_DIN: usize> trigger::TriggerSource for Frontend<N_AIN, N_DIN> {
    fn analog_inst(&self, channel: usize) -> Q15 {
        self.analog.channel(channel).value_inst()
    }
    fn analog_eff(&self, channel: usize) -> Q15 {
        self.analog.channel(channel).value_eff()
    }
    fn digital_state(&self, channel: usize) -> bool {
        self.digital.channel(channel).state()
    }
    fn digital_changed(&self, channel: usize) -> bool {
        self.digital.channel(channel).changed()
    }
}

impl<const N_AIN: usize, const N_DIN: usize> oscillogram::ValueSource for Frontend<N_AIN, N_DIN> {
    fn analog_inst(&self, channel: usize) -> Q15 {
        self.analog.channel(channel).value_inst()
    }
    fn analog_eff(&self, channel: usize) -> Q15 {
        self.analog.channel(channel).value_eff()
    }
    fn digital_state(&self, channel: usize) -> bool {
        self.digital.channel(channel).state()
    }
}

/// The explicit composition root: every subsystem C1–C6 as one named
/// field, constructed once by the board integration and driven by
/// [`Recorder::tick`] every scheduler period.
///
/// There is no module-level `static` anywhere in this crate; this struct,
/// owned by the RTIC shared-resources struct in
/// `src/bin/recorder.rs`, is the single place that state lives.
pub struct Recorder<
    const N_AIN: usize,
    const N_DIN: usize,
    const N_OSC: usize,
    const N_TRIG: usize,
    const EVENT_POOL: usize,
    const TREND_POOL: usize,
    const TREND_BUFFERS: usize,
    const STORAGE_QUEUE: usize,
> {
    pub settings: config::Settings<N_AIN, N_DIN, N_OSC, N_TRIG>,
    pub frontend: Frontend<N_AIN, N_DIN>,
    pub triggers: trigger::Channels<N_TRIG>,
    pub event_osc: oscillogram::Oscillogram<EVENT_POOL, N_OSC>,
    pub trends: storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>,
    pub storage: storage::Worker<STORAGE_QUEUE>,
    pub logger: logger::Logger,
    now: Timestamp,
}

impl<
        const N_AIN: usize,
        const N_DIN: usize,
        const N_OSC: usize,
        const N_TRIG: usize,
        const EVENT_POOL: usize,
        const TREND_POOL: usize,
        const TREND_BUFFERS: usize,
        const STORAGE_QUEUE: usize,
    > Recorder<N_AIN, N_DIN, N_OSC, N_TRIG, EVENT_POOL, TREND_POOL, TREND_BUFFERS, STORAGE_QUEUE>
{
    pub fn new() -> Self {
        Self {
            settings: Default::default(),
            frontend: Frontend::new(),
            triggers: trigger::Channels::new(),
            event_osc: oscillogram::Oscillogram::new(oscillogram::WrapMode::Wrap),
            trends: storage::trend::Recorder::new(),
            storage: storage::Worker::new(),
            logger: logger::Logger::new(),
            now: Timestamp::new(0, 0),
        }
    }

    pub fn process_analog_frame(&mut self, frame: &hal::AdcFrame<N_AIN>) -> bool {
        self.frontend.process_frame(frame)
    }

    /// Advances every subsystem one scheduler tick: digital debounce, event
    /// and trend buffer append, and the top-level logger state machine, in
    /// that order (mirrors `logger_task_proc`'s per-period sequencing in
    /// the original).
    pub fn tick(&mut self, raw_digital: &impl DigitalInputs, now: Timestamp, dt: Q15) {
        self.now = now;
        self.frontend.tick_digital(raw_digital, dt);
        self.event_osc.append(&self.frontend, now);
        self.trends.append(&self.frontend, now);

        let mut ctx = RecorderContext {
            now,
            frontend: &mut self.frontend,
            triggers: &mut self.triggers,
            event_osc: &mut self.event_osc,
            trends: &mut self.trends,
            storage: &mut self.storage,
        };
        self.logger.tick(&mut ctx, dt);
    }
}

impl<
        const N_AIN: usize,
        const N_DIN: usize,
        const N_OSC: usize,
        const N_TRIG: usize,
        const EVENT_POOL: usize,
        const TREND_POOL: usize,
        const TREND_BUFFERS: usize,
        const STORAGE_QUEUE: usize,
    > Default for Recorder<N_AIN, N_DIN, N_OSC, N_TRIG, EVENT_POOL, TREND_POOL, TREND_BUFFERS, STORAGE_QUEUE>
{
    fn default() -> Self {
        Self::new()
    }
}

/// A borrowing view over every [`Recorder`] field except the [`logger::Logger`]
/// itself, implementing [`Context`].
///
/// `Logger::tick` takes `&mut self` and `&mut impl Context` at once; since
/// the logger is a field of `Recorder`, a `Context` impl on `Recorder`
/// directly would alias `self.logger` with itself. Borrowing every *other*
/// field into this short-lived struct instead keeps the two mutable borrows
/// disjoint, the same way any other split-borrow over a struct's fields
/// would.
struct RecorderContext<'a, const N_AIN: usize, const N_DIN: usize, const N_OSC: usize, const N_TRIG: usize,
    const EVENT_POOL: usize, const TREND_POOL: usize, const TREND_BUFFERS: usize, const STORAGE_QUEUE: usize>
{
    now: Timestamp,
    frontend: &'a mut Frontend<N_AIN, N_DIN>,
    triggers: &'a mut trigger::Channels<N_TRIG>,
    event_osc: &'a mut oscillogram::Oscillogram<EVENT_POOL, N_OSC>,
    trends: &'a mut storage::trend::Recorder<TREND_POOL, N_OSC, TREND_BUFFERS>,
    storage: &'a mut storage::Worker<STORAGE_QUEUE>,
}

impl<'a, const N_AIN: usize, const N_DIN: usize, const N_OSC: usize, const N_TRIG: usize,
    const EVENT_POOL: usize, const TREND_POOL: usize, const TREND_BUFFERS: usize, const STORAGE_QUEUE: usize> Context
    for RecorderContext<'a, N_AIN, N_DIN, N_OSC, N_TRIG, EVENT_POOL, TREND_POOL, TREND_BUFFERS, STORAGE_QUEUE>
{
    fn now(&self) -> Timestamp {
        self.now
    }

    fn digital_reset_activated(&self) -> bool {
        self.frontend.digital.reset_activated()
    }

    fn digital_halt_activated(&self) -> bool {
        self.frontend.digital.halt_activated()
    }

    fn check_triggers(&mut self, dt: Q15) -> Option<usize> {
        self.triggers.check(&*self.frontend, dt)
    }

    fn set_analog_enabled(&mut self, enabled: bool) {
        self.frontend.analog.set_enabled(enabled);
    }

    fn set_triggers_enabled(&mut self, enabled: bool) {
        self.triggers.set_enabled(enabled);
    }

    fn set_trends_enabled(&mut self, enabled: bool) {
        self.trends.set_running(enabled);
    }

    fn reset_analog(&mut self) {
        self.frontend.analog.reset(DEFAULT_WINDOW_SAMPLES);
    }

    fn reset_triggers(&mut self) {
        self.triggers.reset();
    }

    fn reset_trends(&mut self) {
        self.trends.reset();
    }

    fn event_buffer_pause(&mut self, post_trigger_samples: usize) {
        self.event_osc.pause(post_trigger_samples);
    }

    fn event_buffer_paused(&self) -> bool {
        self.event_osc.paused()
    }

    fn event_buffer_resume(&mut self) {
        self.event_osc.resume();
    }

    fn event_buffer_samples_count(&self) -> usize {
        self.event_osc.samples_count()
    }

    fn trends_start(&mut self) {
        let _ = self.storage.submit(storage::Request::TrendStart);
    }

    fn trends_stop(&mut self) {
        let _ = self.storage.submit(storage::Request::TrendStop);
    }

    fn storage_read_conf(&mut self, future: &future::Future) -> error::Result<()> {
        self.storage.submit_tracked(storage::Request::ReadConf, future)
    }

    fn storage_write_event(&mut self, future: &future::Future, event: &Event) -> error::Result<()> {
        self.storage
            .submit_tracked(storage::Request::WriteEvent(*event), future)
    }

    fn trends_sync(&mut self, future: &future::Future) -> error::Result<()> {
        self.storage.submit_tracked(storage::Request::TrendSync, future)
    }

    // The three status outputs are driven directly by the board integration
    // off `logger.state()` after each `tick()` rather than through this
    // trait: `Recorder` holds no `DigitalOutputs` handle of its own (the
    // hardware boundary keeps GPIO wiring out of this crate entirely), so
    // these are no-ops here and exist only to satisfy `Context`.
    fn set_run_output(&mut self, _level: Level) {}
    fn set_error_output(&mut self, _level: Level) {}
    fn set_event_output(&mut self, _level: Level) {}
}
