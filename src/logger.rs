//! The top-level logger state machine (C5): `NoInit ⇄ Run ⇄ Event`, plus
//! `Error` and `Halt`.
//!
//! Grounded on the original firmware's `logger.c` task loop, generalized
//! from its FreeRTOS task/queue shape into a plain `tick()` driven by
//! whatever scheduler wires this crate up: every subsystem the state
//! machine touches is reached through the [`Context`] trait rather than a
//! static singleton.
//!
//! `Halt`'s `{Begin, Sync, Done}` sub-states are a supplemented feature: the
//! original only sketches `LOGGER_STATE_HALT` without an implementation,
//! this crate gives it the same begin/wait/done shape as `NoInit` and
//! `Event` for a clean trend-retention sync before the recorder parks.

use heapless::String;

use crate::config::NAME_LEN;
use crate::future::Future;
use crate::hal::{Level, Timestamp};
use crate::q15::{self, Q15};

/// One second of retry backoff, expressed the way every other duration in
/// this crate is: Q15 seconds would overflow here (max ~1.0s), so retry
/// delays are tracked directly in microseconds against [`Timestamp`].
const RETRY_DELAY_MICROS: i64 = 1_000_000;

/// Top-level logger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NoInit,
    Run,
    Event,
    Error,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    Begin,
    WaitRead,
    Start,
    Done,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Begin,
    WaitOsc,
    BeginWrite,
    WaitWrite,
    Done,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HaltState {
    Begin,
    Sync,
    Done,
}

/// A recorded disturbance event: when it happened and which trigger channel
/// caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Event {
    pub time: Timestamp,
    pub trigger: Option<usize>,
}

/// Every subsystem the logger orchestrates, reached through one explicit
/// handle instead of module-level statics.
pub trait Context {
    fn now(&self) -> Timestamp;

    fn digital_reset_activated(&self) -> bool;
    fn digital_halt_activated(&self) -> bool;

    /// Advances the trigger engine by `dt` and returns the last-activated
    /// channel this tick, if any (ties already resolved by the trigger
    /// bank itself).
    fn check_triggers(&mut self, dt: Q15) -> Option<usize>;

    fn set_analog_enabled(&mut self, enabled: bool);
    fn set_triggers_enabled(&mut self, enabled: bool);
    fn set_trends_enabled(&mut self, enabled: bool);
    fn reset_analog(&mut self);
    fn reset_triggers(&mut self);
    fn reset_trends(&mut self);

    fn event_buffer_pause(&mut self, post_trigger_samples: usize);
    fn event_buffer_paused(&self) -> bool;
    fn event_buffer_resume(&mut self);
    fn event_buffer_samples_count(&self) -> usize;

    fn trends_start(&mut self);
    fn trends_stop(&mut self);

    fn storage_read_conf(&mut self, future: &Future) -> crate::error::Result<()>;
    fn storage_write_event(&mut self, future: &Future, event: &Event) -> crate::error::Result<()>;
    fn trends_sync(&mut self, future: &Future) -> crate::error::Result<()>;

    fn set_run_output(&mut self, level: Level);
    fn set_error_output(&mut self, level: Level);
    fn set_event_output(&mut self, level: Level);
}

/// Scales a sample count by a Q15 fraction, e.g. `osc_time_ratio`.
fn scale_samples(total: usize, ratio: Q15) -> usize {
    ((total as i64 * ratio as i64) >> q15::FRACT_BITS).max(0) as usize
}

fn elapsed_micros(now: Timestamp, since: Timestamp) -> i64 {
    (now.secs - since.secs) * 1_000_000 + now.micros as i64 - since.micros as i64
}

/// The logger state machine.
pub struct Logger {
    state: State,
    init_state: InitState,
    event_state: EventState,
    halt_state: HaltState,

    /// Fraction of the event buffer's total duration kept as post-trigger
    /// data; the remainder is the pre-trigger history already captured.
    pub osc_time_ratio: Q15,

    conf_future: Future,
    conf_last_read: Option<Timestamp>,

    event: Event,
    event_future: Future,
    event_last_write: Option<Timestamp>,

    halt_future: Future,

    /// The recording station's identity, written onto every COMTRADE `.cfg`
    /// file's first line. Set from `config.ini`'s `[log]`
    /// section via [`Logger::set_station_name`]/[`Logger::set_dev_id`];
    /// empty until a config read applies it.
    station_name: String<NAME_LEN>,
    dev_id: String<NAME_LEN>,
}

impl Logger {
    pub const fn new() -> Self {
        Self {
            state: State::NoInit,
            init_state: InitState::Begin,
            event_state: EventState::Begin,
            halt_state: HaltState::Begin,
            osc_time_ratio: q15::q15(0.5),
            conf_future: Future::new(),
            conf_last_read: None,
            event: Event {
                time: Timestamp::new(0, 0),
                trigger: None,
            },
            event_future: Future::new(),
            event_last_write: None,
            halt_future: Future::new(),
            station_name: String::new(),
            dev_id: String::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn last_event(&self) -> Event {
        self.event
    }

    /// `true` once the `Halt` state has finished its trend sync and settled
    /// (`HaltState::Done`); meaningless outside `State::Halt`. Exposed so a
    /// board integration driving RUN/ERROR/EVENT itself (outside the
    /// `Context::set_*_output` hooks) can reproduce the output mapping that
    /// treats `Halt` as still "running" until this is true.
    pub fn halt_done(&self) -> bool {
        self.halt_state == HaltState::Done
    }

    /// Grounded on the original firmware's `logger_station_name`/
    /// `logger_dev_id` accessor pair.
    pub fn station_name(&self) -> &str {
        self.station_name.as_str()
    }

    pub fn set_station_name(&mut self, name: &str) {
        self.station_name.clear();
        let _ = self.station_name.push_str(name);
    }

    pub fn dev_id(&self) -> &str {
        self.dev_id.as_str()
    }

    pub fn set_dev_id(&mut self, id: &str) {
        self.dev_id.clear();
        let _ = self.dev_id.push_str(id);
    }

    fn go_init(&mut self) {
        self.state = State::NoInit;
        self.init_state = InitState::Begin;
    }

    fn go_run(&mut self) {
        self.state = State::Run;
    }

    fn go_event(&mut self, trigger: Option<usize>, now: Timestamp) {
        self.state = State::Event;
        self.event_state = EventState::Begin;
        self.event = Event { time: now, trigger };
    }

    fn go_error(&mut self) {
        log::error!("logger: unrecoverable storage error, entering Error state");
        self.state = State::Error;
    }

    fn go_halt(&mut self) {
        log::warn!("logger: halt requested, beginning trend sync");
        self.state = State::Halt;
        self.halt_state = HaltState::Begin;
    }

    /// Advances the state machine by one tick (the logger cadence is
    /// ~1 ms, `dt` should match that in Q15 seconds).
    pub fn tick(&mut self, ctx: &mut impl Context, dt: Q15) {
        let now = ctx.now();

        if ctx.digital_reset_activated() {
            self.go_init();
        } else if ctx.digital_halt_activated() && self.state != State::Halt {
            self.go_halt();
        }

        if let Some(trigger) = ctx.check_triggers(dt) {
            if self.state == State::Run {
                self.go_event(Some(trigger), now);
            }
        }

        match self.state {
            State::NoInit => self.tick_noinit(ctx, now),
            State::Run => {}
            State::Event => self.tick_event(ctx, now),
            State::Error => {}
            State::Halt => self.tick_halt(ctx, now),
        }

        self.update_outputs(ctx);
    }

    fn update_outputs(&self, ctx: &mut impl Context) {
        let run = matches!(self.state, State::Run | State::Event)
            || (self.state == State::Halt && self.halt_state != HaltState::Done);
        ctx.set_run_output(level(run));
        ctx.set_error_output(level(self.state == State::Error));
        ctx.set_event_output(level(self.state == State::Event));
    }

    fn tick_noinit(&mut self, ctx: &mut impl Context, now: Timestamp) {
        match self.init_state {
            InitState::Begin => {
                ctx.trends_stop();
                ctx.set_analog_enabled(false);
                ctx.set_triggers_enabled(false);
                ctx.set_trends_enabled(false);

                ctx.reset_analog();
                ctx.reset_triggers();
                ctx.reset_trends();

                self.conf_future = Future::new();
                self.conf_future.start();
                match ctx.storage_read_conf(&self.conf_future) {
                    Ok(()) => self.init_state = InitState::WaitRead,
                    Err(e) => {
                        log::warn!("logger: config read failed to submit ({:?}), retrying", e);
                        self.conf_last_read = Some(now);
                        self.init_state = InitState::Retry;
                    }
                }
            }
            InitState::WaitRead => {
                if self.conf_future.done() {
                    match self.conf_future.result() {
                        Ok(()) => {
                            ctx.set_analog_enabled(true);
                            ctx.set_triggers_enabled(true);
                            ctx.set_trends_enabled(true);
                            self.init_state = InitState::Start;
                        }
                        Err(crate::error::Error::IoError) => {
                            log::warn!("logger: config read I/O error, retrying");
                            self.conf_last_read = Some(now);
                            self.init_state = InitState::Retry;
                        }
                        Err(_) => self.go_error(),
                    }
                }
            }
            InitState::Start => {
                ctx.trends_start();
                self.init_state = InitState::Done;
            }
            InitState::Done => self.go_run(),
            InitState::Retry => {
                let ready = match self.conf_last_read {
                    None => true,
                    Some(last) => elapsed_micros(now, last) >= RETRY_DELAY_MICROS,
                };
                if ready {
                    self.init_state = InitState::Begin;
                }
            }
        }
    }

    fn tick_event(&mut self, ctx: &mut impl Context, now: Timestamp) {
        match self.event_state {
            EventState::Begin => {
                let total = ctx.event_buffer_samples_count();
                let post_trigger = scale_samples(total, self.osc_time_ratio);
                ctx.event_buffer_pause(post_trigger);
                self.event_state = EventState::WaitOsc;
            }
            EventState::WaitOsc => {
                if ctx.event_buffer_paused() {
                    self.event_state = EventState::BeginWrite;
                }
            }
            EventState::BeginWrite => {
                self.event_future = Future::new();
                self.event_future.start();
                match ctx.storage_write_event(&self.event_future, &self.event) {
                    Ok(()) => self.event_state = EventState::WaitWrite,
                    Err(e) => {
                        log::warn!("logger: event write failed to submit ({:?}), retrying", e);
                        self.event_last_write = Some(now);
                        self.event_state = EventState::Retry;
                    }
                }
            }
            EventState::WaitWrite => {
                if self.event_future.done() {
                    match self.event_future.result() {
                        Ok(()) => {
                            ctx.event_buffer_resume();
                            self.event_state = EventState::Done;
                        }
                        Err(crate::error::Error::IoError) => {
                            log::warn!("logger: event write I/O error, retrying");
                            self.event_last_write = Some(now);
                            self.event_state = EventState::Retry;
                        }
                        Err(_) => self.go_error(),
                    }
                }
            }
            EventState::Done => self.go_run(),
            EventState::Retry => {
                let ready = match self.event_last_write {
                    None => true,
                    Some(last) => elapsed_micros(now, last) >= RETRY_DELAY_MICROS,
                };
                if ready {
                    self.event_state = EventState::BeginWrite;
                }
            }
        }
    }

    fn tick_halt(&mut self, ctx: &mut impl Context, _now: Timestamp) {
        match self.halt_state {
            HaltState::Begin => {
                ctx.trends_stop();
                self.halt_future = Future::new();
                self.halt_future.start();
                if ctx.trends_sync(&self.halt_future).is_ok() {
                    self.halt_state = HaltState::Sync;
                }
            }
            HaltState::Sync => {
                if self.halt_future.done() {
                    self.halt_state = HaltState::Done;
                }
            }
            HaltState::Done => {}
        }
    }
}

fn level(active: bool) -> Level {
    if active {
        Level::High
    } else {
        Level::Low
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct FakeContext {
        now: Timestamp,
        reset: bool,
        halt: bool,
        trigger: Option<usize>,
        analog_enabled: bool,
        triggers_enabled: bool,
        trends_enabled: bool,
        buffer_paused: bool,
        buffer_samples: usize,
        read_conf_result: Option<crate::error::Result<()>>,
        write_event_result: Option<crate::error::Result<()>>,
        run_level: Level,
        error_level: Level,
        event_level: Level,
        trends_synced: Cell<bool>,
    }

    impl FakeContext {
        fn new() -> Self {
            Self {
                now: Timestamp::new(0, 0),
                reset: false,
                halt: false,
                trigger: None,
                analog_enabled: false,
                triggers_enabled: false,
                trends_enabled: false,
                buffer_paused: false,
                buffer_samples: 1000,
                read_conf_result: Some(Ok(())),
                write_event_result: Some(Ok(())),
                run_level: Level::Low,
                error_level: Level::Low,
                event_level: Level::Low,
                trends_synced: Cell::new(true),
            }
        }
    }

    impl Context for FakeContext {
        fn now(&self) -> Timestamp {
            self.now
        }
        fn digital_reset_activated(&self) -> bool {
            self.reset
        }
        fn digital_halt_activated(&self) -> bool {
            self.halt
        }
        fn check_triggers(&mut self, _dt: Q15) -> Option<usize> {
            self.trigger.take()
        }
        fn set_analog_enabled(&mut self, enabled: bool) {
            self.analog_enabled = enabled;
        }
        fn set_triggers_enabled(&mut self, enabled: bool) {
            self.triggers_enabled = enabled;
        }
        fn set_trends_enabled(&mut self, enabled: bool) {
            self.trends_enabled = enabled;
        }
        fn reset_analog(&mut self) {}
        fn reset_triggers(&mut self) {}
        fn reset_trends(&mut self) {}
        fn event_buffer_pause(&mut self, _post_trigger_samples: usize) {
            self.buffer_paused = true;
        }
        fn event_buffer_paused(&self) -> bool {
            self.buffer_paused
        }
        fn event_buffer_resume(&mut self) {
            self.buffer_paused = false;
        }
        fn event_buffer_samples_count(&self) -> usize {
            self.buffer_samples
        }
        fn trends_start(&mut self) {}
        fn trends_stop(&mut self) {}
        fn storage_read_conf(&mut self, future: &Future) -> crate::error::Result<()> {
            if let Some(result) = self.read_conf_result.take() {
                future.finish(result);
            }
            Ok(())
        }
        fn storage_write_event(&mut self, future: &Future, _event: &Event) -> crate::error::Result<()> {
            if let Some(result) = self.write_event_result.take() {
                future.finish(result);
            }
            Ok(())
        }
        fn trends_sync(&mut self, future: &Future) -> crate::error::Result<()> {
            if self.trends_synced.get() {
                future.finish(Ok(()));
            }
            Ok(())
        }
        fn set_run_output(&mut self, level: Level) {
            self.run_level = level;
        }
        fn set_error_output(&mut self, level: Level) {
            self.error_level = level;
        }
        fn set_event_output(&mut self, level: Level) {
            self.event_level = level;
        }
    }

    #[test]
    fn boots_through_noinit_into_run() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        for _ in 0..4 {
            logger.tick(&mut ctx, q15::q15(0.001));
        }
        assert_eq!(logger.state(), State::Run);
        assert!(ctx.analog_enabled);
        assert!(ctx.triggers_enabled);
        assert_eq!(ctx.run_level, Level::High);
    }

    #[test]
    fn io_error_retries_config_read() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        ctx.read_conf_result = Some(Err(crate::error::Error::IoError));
        logger.tick(&mut ctx, q15::q15(0.001));
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::NoInit);
        // Retry not yet due (same timestamp): stays in NoInit, not Error.
        assert_ne!(logger.state(), State::Error);
    }

    #[test]
    fn non_io_error_surfaces_as_error_state() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        ctx.read_conf_result = Some(Err(crate::error::Error::InvalidValue));
        logger.tick(&mut ctx, q15::q15(0.001));
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::Error);
        assert_eq!(ctx.error_level, Level::High);
    }

    #[test]
    fn trigger_in_run_state_moves_to_event_and_back() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        for _ in 0..4 {
            logger.tick(&mut ctx, q15::q15(0.001));
        }
        assert_eq!(logger.state(), State::Run);

        ctx.trigger = Some(3);
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::Event);
        assert_eq!(logger.last_event().trigger, Some(3));
        assert_eq!(ctx.event_level, Level::High);

        for _ in 0..5 {
            logger.tick(&mut ctx, q15::q15(0.001));
        }
        assert_eq!(logger.state(), State::Run);
        assert!(!ctx.buffer_paused);
    }

    #[test]
    fn reset_input_forces_noinit_from_any_state() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        for _ in 0..4 {
            logger.tick(&mut ctx, q15::q15(0.001));
        }
        assert_eq!(logger.state(), State::Run);

        ctx.reset = true;
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::NoInit);
    }

    #[test]
    fn station_identity_defaults_empty_and_is_settable() {
        let mut logger = Logger::new();
        assert_eq!(logger.station_name(), "");
        assert_eq!(logger.dev_id(), "");

        logger.set_station_name("Substation 4");
        logger.set_dev_id("REC-12");
        assert_eq!(logger.station_name(), "Substation 4");
        assert_eq!(logger.dev_id(), "REC-12");
    }

    #[test]
    fn halt_input_drains_into_halt_done() {
        let mut logger = Logger::new();
        let mut ctx = FakeContext::new();
        for _ in 0..4 {
            logger.tick(&mut ctx, q15::q15(0.001));
        }
        ctx.halt = true;
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::Halt);
        assert_eq!(ctx.run_level, Level::High); // Halt not yet Done.
        assert!(!logger.halt_done());

        logger.tick(&mut ctx, q15::q15(0.001));
        logger.tick(&mut ctx, q15::q15(0.001));
        assert_eq!(logger.state(), State::Halt);
        assert_eq!(ctx.run_level, Level::Low); // Halt/Done.
        assert!(logger.halt_done());
    }
}
