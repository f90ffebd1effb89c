//! Digital inputs (C2): per-channel polarity, dwell-time debounce, and the
//! RESET/HALT function tagging the logger polls every tick.
//!
//! Grounded on the original firmware's `din.c`: a channel's committed state
//! only moves once the raw (polarity-corrected) level has held steady for
//! at least `dwell_time`; any flicker before that resets the dwell counter
//! rather than accumulating it.

use heapless::String;

use crate::hal::{DigitalInputs as RawInputs, Level};
use crate::q15::{self, Q15};

pub const NAME_LEN: usize = 16;

/// Raw-to-logical polarity, from `[din<i>] mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Mode {
    Normal = 0,
    Inverted = 1,
}

/// The function a channel performs for the logger state machine, from
/// `[din<i>] type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Function {
    None = 0,
    Reset = 1,
    Halt = 2,
}

/// A single debounced digital input.
pub struct InputChannel {
    pub mode: Mode,
    pub function: Function,
    /// Dwell time in Q15 seconds; a rising or falling edge must hold for at
    /// least this long before it commits.
    pub dwell_time: Q15,
    pub name: String<NAME_LEN>,
    state: bool,
    cur_time: Q15,
    changed: bool,
}

impl InputChannel {
    pub const fn new() -> Self {
        Self {
            mode: Mode::Normal,
            function: Function::None,
            dwell_time: 0,
            name: String::new(),
            state: false,
            cur_time: 0,
            changed: false,
        }
    }

    fn logical(&self, raw: Level) -> bool {
        match self.mode {
            Mode::Normal => raw.is_high(),
            Mode::Inverted => !raw.is_high(),
        }
    }

    /// Advances the debounce state machine by `dt` (Q15 seconds) given the
    /// raw level sampled this tick.
    fn process(&mut self, raw: Level, dt: Q15) {
        let instantaneous = self.logical(raw);
        self.changed = false;

        if self.state != instantaneous {
            self.cur_time = q15::add_sat(self.cur_time, dt);
            if self.cur_time >= self.dwell_time {
                self.state = instantaneous;
                self.cur_time = 0;
                self.changed = true;
            }
        } else {
            self.cur_time = 0;
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    fn rising_edge(&self) -> bool {
        self.changed && self.state
    }
}

impl Default for InputChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-size bank of debounced digital inputs.
pub struct InputBank<const N: usize> {
    channels: [InputChannel; N],
}

impl<const N: usize> InputBank<N> {
    pub const fn new() -> Self {
        Self {
            channels: [const { InputChannel::new() }; N],
        }
    }

    pub fn channel(&self, n: usize) -> &InputChannel {
        &self.channels[n]
    }

    pub fn channel_mut(&mut self, n: usize) -> &mut InputChannel {
        &mut self.channels[n]
    }

    /// Samples every raw input and advances each channel's debounce state.
    pub fn process(&mut self, raw: &impl RawInputs, dt: Q15) {
        for i in 0..N {
            let level = raw.read(i);
            self.channels[i].process(level, dt);
        }
    }

    /// The lowest-indexed channel tagged with `function` that committed a
    /// rising edge this tick, if any. Ties between multiple same-function
    /// channels resolve to the lowest index — distinct from the trigger
    /// engine's last-wins rule, since a RESET/HALT line going active is an
    /// immediate, unconditional transition rather than a competing trigger.
    pub fn first_rising_edge(&self, function: Function) -> Option<usize> {
        self.channels
            .iter()
            .position(|ch| ch.function == function && ch.rising_edge())
    }

    pub fn reset_activated(&self) -> bool {
        self.first_rising_edge(Function::Reset).is_some()
    }

    pub fn halt_activated(&self) -> bool {
        self.first_rising_edge(Function::Halt).is_some()
    }
}

impl<const N: usize> Default for InputBank<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedInputs<const N: usize>(pub [Level; N]);
    impl<const N: usize> RawInputs for FixedInputs<N> {
        fn channel_count(&self) -> usize {
            N
        }
        fn read(&self, index: usize) -> Level {
            self.0[index]
        }
    }

    #[test]
    fn fast_flicker_never_asserts_changed() {
        let mut ch = InputChannel::new();
        ch.dwell_time = q15::q15(0.1);
        let dt = q15::q15(0.01);
        for i in 0..50 {
            let raw = if i % 2 == 0 { Level::High } else { Level::Low };
            ch.process(raw, dt);
            assert!(!ch.changed());
        }
    }

    #[test]
    fn steady_hold_commits_exactly_once() {
        let mut ch = InputChannel::new();
        ch.dwell_time = q15::q15(0.1);
        let dt = q15::q15(0.02);
        let mut commits = 0;
        for _ in 0..10 {
            ch.process(Level::High, dt);
            if ch.changed() {
                commits += 1;
            }
        }
        assert_eq!(commits, 1);
        assert!(ch.state());
    }

    #[test]
    fn inverted_mode_flips_polarity() {
        let mut ch = InputChannel::new();
        ch.mode = Mode::Inverted;
        ch.dwell_time = 1;
        ch.process(Level::High, 10);
        assert!(!ch.state());
        ch.process(Level::Low, 10);
        assert!(ch.state());
    }

    #[test]
    fn bank_reports_lowest_indexed_reset_channel() {
        let mut bank: InputBank<3> = InputBank::new();
        bank.channel_mut(0).function = Function::None;
        bank.channel_mut(1).function = Function::Reset;
        bank.channel_mut(1).dwell_time = 1;
        bank.channel_mut(2).function = Function::Reset;
        bank.channel_mut(2).dwell_time = 1;

        let inputs = FixedInputs([Level::Low, Level::High, Level::High]);
        bank.process(&inputs, 10);

        assert_eq!(bank.first_rising_edge(Function::Reset), Some(1));
        assert!(bank.reset_activated());
        assert!(!bank.halt_activated());
    }
}
