//! The oscillogram engine (C3): a pool-backed, bit-packing-aware waveform
//! buffer shared by the event capture and trend-recording paths.
//!
//! Grounded on the original firmware's `osc.h`/`osc.c`/`oscs.c`. The
//! original's `osc_buffer_mode_t` distinguished two usages of the same
//! `osc_t`: a single ring buffer that overwrites in place while waiting for
//! a trigger (`RingInBuffer`, used by the event oscillogram), and a
//! multi-buffer ring where a full buffer hands off to the next
//! (`BufferInRing`, used by trend recording). Rather than carry a mode
//! switch through every accessor, that distinction is pushed to the type's
//! two call sites: [`Oscillogram::new`] with [`WrapMode::Wrap`] gives the
//! event capture semantics directly; [`crate::storage::trend`] owns an
//! array of [`WrapMode::Stop`] instances and advances to the next one
//! itself when the current one fills, which is `BufferInRing` without a
//! mode flag threaded through every read.
//!
//! Every channel also runs a reducer between the two independent
//! decimation stages: the DSP frontend feeds [`Oscillogram::append`] one
//! raw sample per engine tick, and the oscillogram's own [`Decimator`]
//! decides when that running average (analog) or majority vote (digital)
//! actually commits to the sample pool.

use heapless::String;

use crate::config::{ChannelRepr, Source, ValueKind};
use crate::dsp::Decimator;
use crate::hal::Timestamp;
use crate::q15::Q15;

pub const NAME_LEN: usize = 16;
pub const UNIT_LEN: usize = 8;
pub const BITS_PER_SAMPLE: usize = 16;

/// Supplies the committed instantaneous/effective analog values and
/// digital states an oscillogram channel samples from.
///
/// Replaces the original's struct of function pointers plus an opaque
/// `osc_data` pointer: a single capability trait, generic over whichever
/// component owns the live channel state.
pub trait ValueSource {
    fn analog_inst(&self, channel: usize) -> Q15;
    fn analog_eff(&self, channel: usize) -> Q15;
    fn digital_state(&self, channel: usize) -> bool;
}

/// Whether a buffer overwrites in place once full (the event oscillogram's
/// pre-trigger ring) or stops and reports itself full (one trend buffer in
/// a rotation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Wrap,
    Stop,
}

struct Channel {
    src: Source,
    repr: ChannelRepr,
    src_kind: ValueKind,
    src_channel: usize,
    name: String<NAME_LEN>,
    unit: String<UNIT_LEN>,
    real_k: f32,
    enabled: bool,
    offset: usize,
    slots: usize,
    count: usize,
    index: usize,
    filled: usize,
    /// Running reducer state between two oscillogram-decimator commits:
    /// accumulated sum of every raw sample consumed since the last commit
    /// (analog moving-average), or sum of `0`/`1` digital readings
    /// (digital majority-vote — see [`Channel::reduce_and_reset`]).
    accum: i64,
    accum_count: u32,
}

impl Channel {
    const fn new() -> Self {
        Self {
            src: Source::Ain,
            repr: ChannelRepr::Val,
            src_kind: ValueKind::Inst,
            src_channel: 0,
            name: String::new(),
            unit: String::new(),
            real_k: 1.0,
            enabled: false,
            offset: 0,
            slots: 0,
            count: 0,
            index: 0,
            filled: 0,
            accum: 0,
            accum_count: 0,
        }
    }

    fn slots_for(repr: ChannelRepr, count: usize) -> usize {
        let slots = match repr {
            ChannelRepr::Val => count,
            ChannelRepr::Bit => (count + BITS_PER_SAMPLE - 1) / BITS_PER_SAMPLE,
        };
        slots.max(1)
    }

    fn is_full(&self, wrap: WrapMode) -> bool {
        self.count == 0 || (wrap == WrapMode::Stop && self.index >= self.count)
    }

    fn sample_value(&self, source: &impl ValueSource) -> i16 {
        match self.src {
            Source::Ain => match self.src_kind {
                ValueKind::Inst => source.analog_inst(self.src_channel),
                ValueKind::Eff => source.analog_eff(self.src_channel),
            },
            Source::Din => source.digital_state(self.src_channel) as i16,
        }
    }

    fn write_value(&self, data: &mut [i16], index: usize, value: i16) {
        match self.repr {
            ChannelRepr::Val => data[self.offset + index] = value,
            ChannelRepr::Bit => {
                let pos = self.offset + index / BITS_PER_SAMPLE;
                let bit = index % BITS_PER_SAMPLE;
                if value != 0 {
                    data[pos] |= 1 << bit;
                } else {
                    data[pos] &= !(1 << bit);
                }
            }
        }
    }

    fn read_value(&self, data: &[i16], index: usize) -> i16 {
        match self.repr {
            ChannelRepr::Val => data[self.offset + index],
            ChannelRepr::Bit => {
                let pos = self.offset + index / BITS_PER_SAMPLE;
                let bit = index % BITS_PER_SAMPLE;
                if data[pos] & (1 << bit) != 0 {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Folds one raw sample into the running reducer, called on every tick
    /// between commits.
    fn accumulate(&mut self, value: i16) {
        self.accum += value as i64;
        self.accum_count += 1;
    }

    /// Commits the accumulated samples to a single reduced value and resets
    /// the accumulator. A round-half-up average doubles as both reducers:
    /// for an analog channel it is the moving average of the raw samples;
    /// for a digital channel, whose raw samples are always `0`/`1`, the same
    /// rounding is exactly a majority vote over the window.
    fn reduce_and_reset(&mut self) -> i16 {
        let value = if self.accum_count == 0 {
            0
        } else {
            let count = self.accum_count as i64;
            ((self.accum + count / 2) / count) as i16
        };
        self.accum = 0;
        self.accum_count = 0;
        value
    }

    fn append(&mut self, data: &mut [i16], value: i16, wrap: WrapMode) {
        if self.is_full(wrap) {
            return;
        }
        self.write_value(data, self.index, value);
        self.index = match wrap {
            WrapMode::Wrap => (self.index + 1) % self.count,
            WrapMode::Stop => self.index + 1,
        };
        if self.filled < self.count {
            self.filled += 1;
        }
    }

    /// Maps a chronological sample number (0 = oldest committed sample)
    /// onto the physical storage index.
    fn physical_index(&self, logical: usize, wrap: WrapMode) -> usize {
        match wrap {
            WrapMode::Stop => logical,
            WrapMode::Wrap => {
                if self.count == 0 {
                    0
                } else {
                    (self.index + logical) % self.count
                }
            }
        }
    }
}

/// A pool-backed waveform buffer for `N` channels over a `POOL`-i16-slot
/// arena, appended to at the decimated oscillogram sample rate.
pub struct Oscillogram<const POOL: usize, const N: usize> {
    data: [i16; POOL],
    channels: [Channel; N],
    pool_index: usize,
    decim: Decimator,
    skew: u32,
    wrap: WrapMode,
    enabled: bool,
    pause_armed: bool,
    pause_counter: usize,
    start_time: Option<Timestamp>,
    end_time: Option<Timestamp>,
}

impl<const POOL: usize, const N: usize> Oscillogram<POOL, N> {
    pub const fn new(wrap: WrapMode) -> Self {
        Self {
            data: [0; POOL],
            channels: [const { Channel::new() }; N],
            pool_index: 0,
            decim: Decimator::new(1),
            skew: 0,
            wrap,
            enabled: false,
            pause_armed: false,
            pause_counter: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// Configures channel `n`'s source before [`Oscillogram::init_channels`]
    /// allocates pool storage. Channels left disabled take no pool space.
    pub fn configure_channel(
        &mut self,
        n: usize,
        src: Source,
        repr: ChannelRepr,
        src_kind: ValueKind,
        src_channel: usize,
        real_k: f32,
        name: &str,
        unit: &str,
        enabled: bool,
    ) {
        let ch = &mut self.channels[n];
        ch.src = src;
        ch.repr = repr;
        ch.src_kind = src_kind;
        ch.src_channel = src_channel;
        ch.real_k = real_k;
        ch.enabled = enabled;
        ch.name.clear();
        let _ = ch.name.push_str(name);
        ch.unit.clear();
        let _ = ch.unit.push_str(unit);
    }

    /// Allocates pool storage for every enabled channel, scaling each
    /// channel's nominal capacity (`POOL / rate`) down by a common ratio so
    /// that the sum of allocated slots never exceeds `POOL` (Property 4).
    /// Mirrors the original's two-pass `osc_channels_calc_req_size` +
    /// `osc_alloc_buffers`.
    pub fn init_channels(&mut self, rate: u32) -> crate::error::Result<()> {
        use crate::error::Error;

        self.pool_index = 0;
        self.decim = Decimator::new(rate);

        let rate = rate.max(1) as usize;
        let nominal_count = (POOL / rate).max(1);

        let mut req_slots = 0usize;
        for ch in &mut self.channels {
            if !ch.enabled {
                ch.count = 0;
                ch.slots = 0;
                continue;
            }
            ch.count = nominal_count;
            ch.slots = Channel::slots_for(ch.repr, ch.count);
            req_slots += ch.slots;
        }

        if req_slots == 0 {
            return Ok(());
        }

        // Q15 ratio scaling POOL's actual capacity against what was
        // requested, so oversubscribed configurations shrink proportionally
        // instead of failing outright.
        let size_rate = ((POOL as i64) << 15) / req_slots as i64;

        for ch in &mut self.channels {
            if !ch.enabled {
                continue;
            }
            let scaled_count = (((ch.count as i64) * size_rate) >> 15).max(1) as usize;
            let scaled_slots = Channel::slots_for(ch.repr, scaled_count);

            if self.pool_index + scaled_slots > POOL {
                return Err(Error::OutOfMemory);
            }

            ch.offset = self.pool_index;
            ch.slots = scaled_slots;
            ch.count = scaled_count;
            ch.index = 0;
            ch.filled = 0;
            self.pool_index += scaled_slots;
        }

        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Clears write cursors and timestamps without releasing pool layout —
    /// used after an event buffer has been flushed to storage and is ready
    /// to resume live capture.
    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch.index = 0;
            ch.filled = 0;
            ch.accum = 0;
            ch.accum_count = 0;
        }
        self.decim.reset();
        self.skew = 0;
        self.start_time = None;
        self.end_time = None;
        self.pause_armed = false;
        self.pause_counter = 0;
    }

    /// Releases all channel layout and clears state — used when the logger
    /// returns to `NoInit` and configuration is about to be reloaded.
    pub fn reset(&mut self) {
        self.pool_index = 0;
        for ch in &mut self.channels {
            *ch = Channel::new();
        }
        self.clear();
        self.enabled = false;
    }

    /// Feeds every enabled channel's reducer one raw sample, then — once
    /// the oscillogram's own decimator is ready — commits the reduced
    /// value to the buffer and resets the reducer. The buffer is not
    /// frozen; every call between commits still feeds the moving-average/
    /// majority-vote accumulator even though nothing is written to `data`
    /// yet.
    pub fn append(&mut self, source: &impl ValueSource, now: Timestamp) {
        if !self.enabled {
            return;
        }
        if self.pause_armed {
            if self.pause_counter == 0 {
                return;
            }
            self.pause_counter -= 1;
        }

        for i in 0..N {
            if !self.channels[i].enabled {
                continue;
            }
            let value = self.channels[i].sample_value(source);
            self.channels[i].accumulate(value);
        }

        if !self.decim.tick() {
            self.skew += 1;
            return;
        }
        self.skew = 0;

        for i in 0..N {
            if !self.channels[i].enabled {
                continue;
            }
            let value = self.channels[i].reduce_and_reset();
            self.channels[i].append(&mut self.data, value, self.wrap);
        }

        if self.start_time.is_none() {
            self.start_time = Some(now);
        }
        self.end_time = Some(now);
    }

    /// Arms a pause that freezes the buffer after `post_trigger_samples`
    /// more commits.
    pub fn pause(&mut self, post_trigger_samples: usize) {
        self.pause_counter = post_trigger_samples;
        self.pause_armed = true;
    }

    pub fn paused(&self) -> bool {
        self.pause_armed && self.pause_counter == 0
    }

    pub fn resume(&mut self) {
        self.clear();
    }

    /// True once a `WrapMode::Stop` buffer has filled every enabled
    /// channel's capacity; always false for a wrapping buffer.
    pub fn full(&self) -> bool {
        self.wrap == WrapMode::Stop
            && self
                .channels
                .iter()
                .any(|ch| ch.enabled && ch.is_full(WrapMode::Stop))
    }

    /// The representative per-channel sample capacity (the smallest among
    /// enabled channels, a safe lower bound for iteration).
    pub fn samples_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|ch| ch.enabled)
            .map(|ch| ch.count)
            .min()
            .unwrap_or(0)
    }

    /// How many chronologically-ordered samples are actually available to
    /// read back right now (bounded by `samples_count`).
    pub fn committed_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|ch| ch.enabled)
            .map(|ch| ch.filled)
            .min()
            .unwrap_or(0)
    }

    pub fn channel_enabled(&self, n: usize) -> bool {
        self.channels[n].enabled
    }

    pub fn channel_name(&self, n: usize) -> &str {
        self.channels[n].name.as_str()
    }

    pub fn channel_unit(&self, n: usize) -> &str {
        self.channels[n].unit.as_str()
    }

    pub fn channel_real_k(&self, n: usize) -> f32 {
        self.channels[n].real_k
    }

    pub fn channel_repr(&self, n: usize) -> ChannelRepr {
        self.channels[n].repr
    }

    pub fn channel_src(&self, n: usize) -> Source {
        self.channels[n].src
    }

    /// Reads chronological sample `logical` (`0` = oldest committed) from
    /// channel `n`.
    pub fn channel_value(&self, n: usize, logical: usize) -> i16 {
        let ch = &self.channels[n];
        if ch.count == 0 || logical >= ch.count {
            return 0;
        }
        let physical = ch.physical_index(logical, self.wrap);
        ch.read_value(&self.data, physical)
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.end_time
    }

    pub fn skew(&self) -> u32 {
        self.skew
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstSource(Q15, bool);
    impl ValueSource for ConstSource {
        fn analog_inst(&self, _channel: usize) -> Q15 {
            self.0
        }
        fn analog_eff(&self, _channel: usize) -> Q15 {
            self.0
        }
        fn digital_state(&self, _channel: usize) -> bool {
            self.1
        }
    }

    fn ts(s: i64) -> Timestamp {
        Timestamp::new(s, 0)
    }

    #[test]
    fn pool_budget_is_never_exceeded() {
        let mut osc: Oscillogram<64, 3> = Oscillogram::new(WrapMode::Wrap);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.configure_channel(1, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 1, 1.0, "b", "", true);
        osc.configure_channel(2, Source::Din, ChannelRepr::Bit, ValueKind::Inst, 0, 1.0, "d", "", true);
        osc.init_channels(1).unwrap();
        assert!(osc.pool_index <= 64);
    }

    #[test]
    fn ring_mode_keeps_most_recent_window() {
        let mut osc: Oscillogram<8, 1> = Oscillogram::new(WrapMode::Wrap);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.init_channels(1).unwrap();
        osc.set_enabled(true);
        let count = osc.samples_count();
        for i in 0..(2 * count) {
            let src = ConstSource(i as i16, false);
            osc.append(&src, ts(i as i64));
        }
        for i in 0..count {
            assert_eq!(osc.channel_value(0, i) as usize, count + i);
        }
    }

    #[test]
    fn stop_mode_reports_full_without_wrapping() {
        let mut osc: Oscillogram<4, 1> = Oscillogram::new(WrapMode::Stop);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.init_channels(1).unwrap();
        osc.set_enabled(true);
        let count = osc.samples_count();
        for i in 0..(count + 5) {
            let src = ConstSource(i as i16, false);
            osc.append(&src, ts(0));
        }
        assert!(osc.full());
        assert_eq!(osc.channel_value(0, 0), 0);
    }

    #[test]
    fn pause_freezes_after_post_trigger_samples() {
        let mut osc: Oscillogram<16, 1> = Oscillogram::new(WrapMode::Wrap);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.init_channels(1).unwrap();
        osc.set_enabled(true);
        osc.pause(2);
        let src = ConstSource(1, false);
        assert!(!osc.paused());
        osc.append(&src, ts(0));
        osc.append(&src, ts(1));
        assert!(osc.paused());
        let before = osc.channel_value(0, 0);
        osc.append(&src, ts(2));
        assert_eq!(osc.channel_value(0, 0), before);
    }

    #[test]
    fn digital_bit_packing_round_trips() {
        let mut osc: Oscillogram<4, 1> = Oscillogram::new(WrapMode::Stop);
        osc.configure_channel(0, Source::Din, ChannelRepr::Bit, ValueKind::Inst, 0, 1.0, "d", "", true);
        osc.init_channels(1).unwrap();
        osc.set_enabled(true);
        let pattern = [true, false, true, true, false];
        for (i, &bit) in pattern.iter().enumerate() {
            let src = ConstSource(0, bit);
            osc.append(&src, ts(i as i64));
        }
        for (i, &bit) in pattern.iter().enumerate() {
            assert_eq!(osc.channel_value(0, i), bit as i16);
        }
    }

    #[test]
    fn moving_average_reducer_consumes_every_tick_between_commits() {
        let mut osc: Oscillogram<64, 1> = Oscillogram::new(WrapMode::Stop);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.init_channels(4).unwrap();
        osc.set_enabled(true);

        // Three sub-decimated ticks must not yet commit anything.
        osc.append(&ConstSource(0, false), ts(0));
        osc.append(&ConstSource(10, false), ts(0));
        osc.append(&ConstSource(20, false), ts(0));
        assert_eq!(osc.committed_count(), 0);

        osc.append(&ConstSource(30, false), ts(0));
        // (0+10+20+30)/4, round-half-up.
        assert_eq!(osc.channel_value(0, 0), 15);
        assert_eq!(osc.committed_count(), 1);
    }

    #[test]
    fn majority_vote_reducer_commits_the_dominant_digital_state() {
        let mut osc: Oscillogram<64, 1> = Oscillogram::new(WrapMode::Stop);
        osc.configure_channel(0, Source::Din, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "d", "", true);
        osc.init_channels(5).unwrap();
        osc.set_enabled(true);

        for &bit in &[true, true, true, false, false] {
            osc.append(&ConstSource(0, bit), ts(0));
        }
        assert_eq!(osc.channel_value(0, 0), 1);

        for &bit in &[false, false, true, true, false] {
            osc.append(&ConstSource(0, bit), ts(1));
        }
        assert_eq!(osc.channel_value(0, 1), 0);
    }

    #[test]
    fn disabled_oscillogram_drops_appends() {
        let mut osc: Oscillogram<4, 1> = Oscillogram::new(WrapMode::Wrap);
        osc.configure_channel(0, Source::Ain, ChannelRepr::Val, ValueKind::Inst, 0, 1.0, "a", "", true);
        osc.init_channels(1).unwrap();
        let src = ConstSource(42, false);
        osc.append(&src, ts(0));
        assert_eq!(osc.channel_value(0, 0), 0);
    }
}
