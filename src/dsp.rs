//! DSP frontend (C1): ADC frame → normalized, FIR-filtered, decimated,
//! windowed instantaneous/effective Q15 values, one pipeline per analog
//! channel.
//!
//! Ordering matters here: for a single channel the pipeline is strictly
//! FIFO (raw sample → FIR → decimator → value commit), and across channels
//! within one ADC frame the processing order is fixed (channel 0..N-1) so
//! that every channel's effective-value window stays phase-aligned with
//! the others.

use crate::q15::{self, IQ15, Q15};

/// Number of taps in the fixed FIR low-pass filter.
pub const FIR_TAPS: usize = 23;

/// Symmetric 23-tap FIR low-pass coefficients (Q15, unity passband gain),
/// fixed in ROM — matches the original firmware's hand-tuned filter.
pub const FIR_COEFFS: [Q15; FIR_TAPS] = [
    -72, -74, -66, 8, 218, 620, 1226, 1990, 2809, 3546, 4058, 4242, 4058,
    3546, 2809, 1990, 1226, 620, 218, 8, -66, -74, -72,
];

/// Upper bound on the effective-value moving window. `sample_freq /
/// line_freq` at the default 1600 Hz / 25 Hz worst case is 64; doubled for
/// headroom against unusual line frequencies.
pub const MAX_WINDOW: usize = 128;

/// A circular-buffer FIR filter with saturating Q15 read-out.
pub struct Fir {
    taps: [Q15; FIR_TAPS],
    index: usize,
}

impl Fir {
    pub const fn new() -> Self {
        Self {
            taps: [0; FIR_TAPS],
            index: 0,
        }
    }

    /// Shifts one new sample into the delay line. Does not compute the
    /// convolution — call [`Fir::output`] at the decimated rate to read a
    /// value out.
    pub fn push(&mut self, x: Q15) {
        self.taps[self.index] = x;
        self.index = (self.index + 1) % FIR_TAPS;
    }

    /// Computes the filter's current output: a saturating Q15
    /// multiply-accumulate across all taps, oldest-to-newest.
    pub fn output(&self) -> Q15 {
        let mut acc: i32 = 0;
        for tap in 0..FIR_TAPS {
            let sample = self.taps[(self.index + tap) % FIR_TAPS];
            acc = q15::mla(sample, FIR_COEFFS[tap], acc);
        }
        q15::sat_q15(acc >> q15::FRACT_BITS)
    }

    pub fn reset(&mut self) {
        self.taps = [0; FIR_TAPS];
        self.index = 0;
    }
}

impl Default for Fir {
    fn default() -> Self {
        Self::new()
    }
}

/// Decimates a sample stream by a fixed integer ratio.
#[derive(Debug, Clone, Copy)]
pub struct Decimator {
    ratio: u32,
    counter: u32,
}

impl Decimator {
    pub const fn new(ratio: u32) -> Self {
        Self {
            ratio: if ratio > 1 { ratio } else { 1 },
            counter: 0,
        }
    }

    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    /// Advances the counter by one input sample; returns `true` exactly
    /// once every `ratio` calls (the "ready" edge).
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.ratio {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Number of sub-decimated samples pending since the last ready edge —
    /// the "skew" used to back-date a paused buffer's `end_wall_time`.
    pub fn skew(&self) -> u32 {
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// A rolling sum over the last `size` contributions, used for both the
/// moving-average and moving-RMS effective-value computations. Overflow of
/// the running sum saturates rather than wraps.
pub struct MovingWindow {
    buf: [i64; MAX_WINDOW],
    size: usize,
    index: usize,
    sum: i64,
}

impl MovingWindow {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_WINDOW],
            size: 0,
            index: 0,
            sum: 0,
        }
    }

    /// Sets the window length in samples, clamped to [`MAX_WINDOW`], and
    /// clears accumulated state.
    pub fn set_size(&mut self, size: usize) {
        self.size = size.min(MAX_WINDOW).max(1);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buf = [0; MAX_WINDOW];
        self.index = 0;
        self.sum = 0;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Pushes a new contribution, evicting the oldest one from the sum.
    pub fn push(&mut self, contribution: i64) {
        if self.size == 0 {
            return;
        }
        let old = self.buf[self.index];
        self.sum = self.sum.saturating_sub(old).saturating_add(contribution);
        self.buf[self.index] = contribution;
        self.index = (self.index + 1) % self.size;
    }

    pub fn mean(&self) -> i64 {
        if self.size == 0 {
            0
        } else {
            self.sum / self.size as i64
        }
    }
}

impl Default for MovingWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// A channel's waveform classification, from `[ain<i>] type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum ChannelKind {
    Dc = 0,
    Ac = 1,
}

/// The effective-value estimator, from `[ain<i>] eff_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum EffKind {
    Avg = 0,
    Rms = 1,
}

/// ADC native resolution used by [`normalize_adc`]. Not itself a config
/// key (the config surface only exposes the per-channel offset/gain), matching the
/// original firmware's compile-time `ADC_RESOLUTION` constant.
pub const ADC_BITS: u32 = 16;

/// A single analog channel's DSP state: normalization parameters, FIR
/// delay line, and effective-value window.
pub struct AnalogChannel {
    pub kind: ChannelKind,
    pub eff_kind: EffKind,
    pub adc_offset: u32,
    pub adc_gain: Q15,
    pub eff_gain: Q15,
    pub real_k: f32,
    pub enabled: bool,
    fir: Fir,
    window: MovingWindow,
    value_inst: Q15,
    value_eff: Q15,
}

impl AnalogChannel {
    pub const fn new() -> Self {
        Self {
            kind: ChannelKind::Ac,
            eff_kind: EffKind::Rms,
            adc_offset: 0,
            adc_gain: q15::Q15_ONE as Q15,
            eff_gain: q15::Q15_ONE as Q15,
            real_k: 1.0,
            enabled: false,
            fir: Fir::new(),
            window: MovingWindow::new(),
            value_inst: 0,
            value_eff: 0,
        }
    }

    /// Sets the effective-value window length in samples (`sample_freq /
    /// line_freq`) and clears all filter/window state.
    pub fn reset(&mut self, window_size: usize) {
        self.fir.reset();
        self.window.set_size(window_size);
        self.value_inst = 0;
        self.value_eff = 0;
    }

    /// Latest instantaneous value; `0` for a disabled channel.
    pub fn value_inst(&self) -> Q15 {
        if self.enabled {
            self.value_inst
        } else {
            0
        }
    }

    /// Latest effective (AVG or RMS) value; `0` for a disabled channel.
    pub fn value_eff(&self) -> Q15 {
        if self.enabled {
            self.value_eff
        } else {
            0
        }
    }

    fn contribution(&self, y: Q15) -> i64 {
        match (self.kind, self.eff_kind) {
            (ChannelKind::Ac, EffKind::Avg) => (y as i32).unsigned_abs() as i64,
            (_, EffKind::Rms) => (y as i64) * (y as i64),
            (ChannelKind::Dc, EffKind::Avg) => y as i64,
        }
    }

    fn commit_effective(&mut self) {
        match self.eff_kind {
            EffKind::Rms => {
                let mean_sq = self.window.mean(); // Q30 scale
                let v = (mean_sq >> q15::FRACT_BITS) as IQ15;
                let rms = q15::sqrt_q15(v);
                self.value_eff = q15::mul(rms, self.eff_gain);
            }
            EffKind::Avg => {
                let avg = q15::sat_q15(self.window.mean() as i32);
                self.value_eff = q15::mul(avg, self.eff_gain);
            }
        }
    }

    /// Feeds one raw ADC sample through normalization and the FIR delay
    /// line; on the decimated ready edge, commits new instantaneous and
    /// effective values. A disabled channel advances no state at all.
    fn process(&mut self, raw: u32, ready: bool) {
        if !self.enabled {
            return;
        }
        let normalized = q15::normalize_adc(raw, ADC_BITS, self.adc_offset);
        let scaled = q15::mul(normalized, self.adc_gain);
        self.fir.push(scaled);

        if ready {
            let y = self.fir.output();
            self.value_inst = y;
            let contribution = self.contribution(y);
            self.window.push(contribution);
            self.commit_effective();
        }
    }
}

impl Default for AnalogChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns `N` analog channel pipelines and the single shared decimator that
/// keeps them phase-aligned.
pub struct AnalogFrontend<const N: usize> {
    channels: [AnalogChannel; N],
    decimator: Decimator,
    enabled: bool,
}

impl<const N: usize> AnalogFrontend<N> {
    pub const fn new(oversample_ratio: u32) -> Self {
        Self {
            channels: [const { AnalogChannel::new() }; N],
            decimator: Decimator::new(oversample_ratio),
            enabled: false,
        }
    }

    pub fn channel(&self, n: usize) -> &AnalogChannel {
        &self.channels[n]
    }

    pub fn channel_mut(&mut self, n: usize) -> &mut AnalogChannel {
        &mut self.channels[n]
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset(&mut self, window_size: usize) {
        self.decimator.reset();
        for ch in &mut self.channels {
            ch.reset(window_size);
        }
    }

    pub fn decimator(&self) -> &Decimator {
        &self.decimator
    }

    /// Processes one ADC frame (one raw sample per channel), channel 0..N-1
    /// in order. Returns `true` if this frame produced a decimated commit.
    pub fn process_frame(&mut self, frame: &[u32; N]) -> bool {
        if !self.enabled {
            return false;
        }
        let ready = self.decimator.tick();
        for i in 0..N {
            self.channels[i].process(frame[i], ready);
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimator_emits_ready_every_ratio_ticks() {
        let mut d = Decimator::new(8);
        for _ in 0..7 {
            assert!(!d.tick());
        }
        assert!(d.tick());
        for _ in 0..7 {
            assert!(!d.tick());
        }
        assert!(d.tick());
    }

    #[test]
    fn fir_linearity_under_small_signals() {
        // FIR(a*x) ~= a*FIR(x) for a constant-offset input well within the
        // saturation range (property 2).
        let mut f1 = Fir::new();
        let mut f2 = Fir::new();
        for _ in 0..40 {
            f1.push(1000);
            f2.push(2000);
        }
        let o1 = f1.output() as i32;
        let o2 = f2.output() as i32;
        assert!((o2 - 2 * o1).abs() <= 2);
    }

    #[test]
    fn disabled_channel_reads_zero_and_freezes_state() {
        let mut ch = AnalogChannel::new();
        ch.reset(4);
        ch.enabled = false;
        ch.process(60000, true);
        assert_eq!(ch.value_inst(), 0);
        assert_eq!(ch.value_eff(), 0);
    }

    #[test]
    fn enabled_dc_channel_tracks_constant_input() {
        let mut ch = AnalogChannel::new();
        ch.kind = ChannelKind::Dc;
        ch.eff_kind = EffKind::Avg;
        ch.enabled = true;
        ch.adc_offset = 32768;
        ch.adc_gain = q15::Q15_ONE as Q15;
        ch.eff_gain = q15::Q15_ONE as Q15;
        ch.reset(8);
        // Constant full-scale-positive input settles the FIR and window.
        for _ in 0..200 {
            ch.process(65535, true);
        }
        assert!(ch.value_inst() > 32000);
        assert!(ch.value_eff() > 32000);
    }

    #[test]
    fn rms_of_constant_equals_constant() {
        let mut ch = AnalogChannel::new();
        ch.kind = ChannelKind::Ac;
        ch.eff_kind = EffKind::Rms;
        ch.enabled = true;
        ch.adc_offset = 32768;
        ch.adc_gain = q15::Q15_ONE as Q15;
        ch.eff_gain = q15::Q15_ONE as Q15;
        ch.reset(8);
        for _ in 0..200 {
            ch.process(65535, true);
        }
        // FIR settles to ~full scale; RMS of a constant equals its
        // magnitude.
        assert!((ch.value_inst() as i32 - ch.value_eff() as i32).abs() < 2000);
    }

    #[test]
    fn frontend_respects_global_enable() {
        let mut fe: AnalogFrontend<2> = AnalogFrontend::new(8);
        fe.reset(4);
        fe.channel_mut(0).enabled = true;
        assert!(!fe.process_frame(&[1000, 1000]));
        fe.set_enabled(true);
        let mut committed = false;
        for _ in 0..8 {
            committed |= fe.process_frame(&[40000, 40000]);
        }
        assert!(committed);
    }
}
