//! The trigger engine (C4): per-channel threshold dwell-time detection
//! feeding the logger's Run → Event transition.
//!
//! Grounded on the original firmware's `trig.c`. Each channel accumulates
//! "out of bounds" time while its source value compares past `reference`;
//! once that accumulation reaches `time`, the channel latches `active` and
//! reports a one-tick `activated` edge. [`Channels::check`] then resolves
//! simultaneous activations to the **last**-indexed channel, resolving the
//! source's FIRST-vs-LAST ambiguity.

use heapless::String;

use crate::config::{CompareKind, Source, ValueKind};
use crate::q15::{self, Q15};

pub const NAME_LEN: usize = 16;

/// Supplies the live values a trigger channel compares against.
pub trait TriggerSource {
    fn analog_inst(&self, channel: usize) -> Q15;
    fn analog_eff(&self, channel: usize) -> Q15;
    fn digital_state(&self, channel: usize) -> bool;
    fn digital_changed(&self, channel: usize) -> bool;
}

/// A single threshold-dwell trigger.
pub struct Channel {
    pub src: Source,
    pub src_channel: usize,
    pub src_kind: ValueKind,
    pub compare: CompareKind,
    /// Dwell time, Q15 seconds: how long the value must stay past
    /// `reference` before the channel activates.
    pub time: Q15,
    /// Threshold, already converted into the same normalized Q15 units as
    /// the sampled value (see [`Channel::set_reference`]).
    reference: Q15,
    pub name: String<NAME_LEN>,
    pub enabled: bool,
    cur_time: Q15,
    active: bool,
    activated: bool,
    fail: bool,
}

impl Channel {
    pub const fn new() -> Self {
        Self {
            src: Source::Ain,
            src_channel: 0,
            src_kind: ValueKind::Inst,
            compare: CompareKind::Ovf,
            time: 0,
            reference: 0,
            name: String::new(),
            enabled: false,
            cur_time: 0,
            active: false,
            activated: false,
            fail: false,
        }
    }

    /// Converts an engineering-units threshold into the channel's internal
    /// comparison units: for an analog source, through `real_k`; for a
    /// digital source (which compares against a plain 0/1), a direct
    /// truncation.
    pub fn set_reference(&mut self, reference_eng: f32, real_k: f32) {
        self.reference = match self.src {
            Source::Ain => q15::real_to_q15(reference_eng, real_k),
            Source::Din => q15::sat_q15(reference_eng as i32),
        };
    }

    pub fn reset(&mut self) {
        self.activated = false;
        self.active = false;
        self.fail = false;
        self.cur_time = 0;
    }

    fn value(&self, source: &impl TriggerSource) -> i32 {
        match self.src {
            Source::Ain => match self.src_kind {
                ValueKind::Inst => source.analog_inst(self.src_channel) as i32,
                ValueKind::Eff => source.analog_eff(self.src_channel) as i32,
            },
            Source::Din => match self.src_kind {
                ValueKind::Inst => source.digital_state(self.src_channel) as i32,
                ValueKind::Eff => {
                    (source.digital_changed(self.src_channel) && source.digital_state(self.src_channel))
                        as i32
                }
            },
        }
    }

    fn compare(&self, value: i32) -> bool {
        match self.compare {
            CompareKind::Ovf => value > self.reference as i32,
            CompareKind::Udf => value < self.reference as i32,
        }
    }

    /// Advances the dwell state machine by `dt` (Q15 seconds); returns
    /// `true` exactly on the tick the channel transitions inactive →
    /// active (Property 6).
    fn check(&mut self, source: &impl TriggerSource, dt: Q15) -> bool {
        if !self.enabled {
            return false;
        }

        let value = self.value(source);
        let fail = self.compare(value);
        let mut activated = false;

        if fail {
            self.cur_time = q15::add_sat(self.cur_time, dt);
            if self.cur_time >= self.time {
                self.cur_time = self.time;
                if !self.active {
                    activated = true;
                }
                self.active = true;
            }
        } else {
            self.active = false;
            self.cur_time = 0;
        }

        self.fail = fail;
        self.activated = activated;
        activated
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn activated(&self) -> bool {
        self.activated
    }

    pub fn failing(&self) -> bool {
        self.fail
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed-size bank of trigger channels.
pub struct Channels<const N: usize> {
    channels: [Channel; N],
    enabled: bool,
}

impl<const N: usize> Channels<N> {
    pub const fn new() -> Self {
        Self {
            channels: [const { Channel::new() }; N],
            enabled: false,
        }
    }

    pub fn channel(&self, n: usize) -> &Channel {
        &self.channels[n]
    }

    pub fn channel_mut(&mut self, n: usize) -> &mut Channel {
        &mut self.channels[n]
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.reset();
        }
    }

    /// Checks every channel and resolves simultaneous activations to the
    /// last-indexed one, returning its index.
    pub fn check(&mut self, source: &impl TriggerSource, dt: Q15) -> Option<usize> {
        if !self.enabled {
            return None;
        }

        let mut triggered = None;
        for i in 0..N {
            if self.channels[i].check(source, dt) {
                triggered = Some(i);
            }
        }
        triggered
    }
}

impl<const N: usize> Default for Channels<N> {
    fn default() -> Self {
        Self::new()
    }
}
