//! Binds a paused oscillogram buffer to the COMTRADE/CSV writers and drives
//! the three-file write `storage.c`'s dispatch handlers perform.
//!
//! Grounded on the original firmware's `event.c`: `event_write` calls
//! `event_ctrd_write` (CFG then DAT) and `event_csv_write`, all reading the
//! live `osc_*` singleton directly rather than a copy carried through the
//! command queue (`storage_cmd_wr_event_t` only carries `event_t`, see
//! `storage.c`). [`BufferSource`] is the capability-trait equivalent of that
//! live read — constructed against whichever [`Oscillogram`] the caller
//! currently has paused — and [`write_buffer_files`] is `event_write`'s
//! ordered CSV→CFG→DAT sequence (the commented-out `event_csv_write` call in
//! the original is restored here rather than carried over as dead code).
//! [`crate::storage::trend`] reuses both for trend-file rollover, since a
//! trend buffer is the same [`Oscillogram`] shape run in
//! [`crate::oscillogram::WrapMode::Stop`].

use heapless::Vec;

use crate::config::ChannelRepr;
use crate::hal::Timestamp;
use crate::oscillogram::Oscillogram;
use crate::storage::comtrade::{self, AnalogChannelInfo, ComtradeSource, DigitalChannelInfo, SampleRate};
use crate::storage::csv::{self, ChannelInfo, CsvSource};
use crate::storage::fs::Directory;

pub const FILENAME_LEN: usize = 32;

/// The per-write identity and timing metadata every CFG/CSV header line
/// needs, bundled so callers don't thread four parameters through every
/// function in this module.
pub struct Identity<'a> {
    pub station_name: &'a str,
    pub dev_id: &'a str,
    pub line_frequency_hz: f32,
    pub sample_rate_hz: f32,
}

/// Adapts an [`Oscillogram`] buffer to the [`ComtradeSource`]/[`CsvSource`]
/// capability traits, restricted to chronological samples `range`.
///
/// Splits enabled channels into analog (`ChannelRepr::Val`) and digital
/// (`ChannelRepr::Bit`) subsets up front, mirroring
/// `event_ctrd_calc_channels`'s `osc_channel_type(i) == OSC_VAL` filter.
pub struct BufferSource<'a, const POOL: usize, const N: usize> {
    osc: &'a Oscillogram<POOL, N>,
    analog: Vec<usize, N>,
    digital: Vec<usize, N>,
    range_start: usize,
    range_len: usize,
    trigger: Option<usize>,
    identity: &'a Identity<'a>,
    rates: [SampleRate; 1],
}

impl<'a, const POOL: usize, const N: usize> BufferSource<'a, POOL, N> {
    pub fn new(
        osc: &'a Oscillogram<POOL, N>,
        range: core::ops::Range<usize>,
        trigger: Option<usize>,
        identity: &'a Identity<'a>,
    ) -> Self {
        let mut analog = Vec::new();
        let mut digital = Vec::new();
        for i in 0..N {
            if !osc.channel_enabled(i) {
                continue;
            }
            match osc.channel_repr(i) {
                ChannelRepr::Val => {
                    let _ = analog.push(i);
                }
                ChannelRepr::Bit => {
                    let _ = digital.push(i);
                }
            }
        }
        let range_len = range.end.saturating_sub(range.start);
        let end_sample = range_len.saturating_sub(1) as u32;
        Self {
            osc,
            analog,
            digital,
            range_start: range.start,
            range_len,
            trigger,
            identity,
            rates: [SampleRate {
                rate_hz: identity.sample_rate_hz,
                end_sample,
            }],
        }
    }

    fn logical(&self, sample: usize) -> usize {
        self.range_start + sample
    }
}

impl<const POOL: usize, const N: usize> ComtradeSource for BufferSource<'_, POOL, N> {
    fn analog_channel_count(&self) -> usize {
        self.analog.len()
    }

    fn analog_channel(&self, index: usize) -> AnalogChannelInfo<'_> {
        let ch = self.analog[index];
        AnalogChannelInfo {
            id: self.osc.channel_name(ch),
            phase: "",
            component: "",
            unit: self.osc.channel_unit(ch),
            a: self.osc.channel_real_k(ch),
            b: 0.0,
            skew_micros: 0,
            min: i16::MIN + 1,
            max: i16::MAX,
            primary_ratio: 1.0,
            secondary_ratio: 1.0,
            primary: true,
        }
    }

    fn analog_value(&self, index: usize, sample: usize) -> i16 {
        self.osc.channel_value(self.analog[index], self.logical(sample))
    }

    fn digital_channel_count(&self) -> usize {
        self.digital.len()
    }

    fn digital_channel(&self, index: usize) -> DigitalChannelInfo<'_> {
        let ch = self.digital[index];
        DigitalChannelInfo {
            id: self.osc.channel_name(ch),
            phase: "",
            component: "",
            normal_state: false,
        }
    }

    fn digital_value(&self, index: usize, sample: usize) -> bool {
        self.osc.channel_value(self.digital[index], self.logical(sample)) != 0
    }

    fn line_frequency(&self) -> f32 {
        self.identity.line_frequency_hz
    }

    fn sample_rates(&self) -> &[SampleRate] {
        &self.rates
    }
}

impl<const POOL: usize, const N: usize> CsvSource for BufferSource<'_, POOL, N> {
    fn channel_count(&self) -> usize {
        self.analog.len() + self.digital.len()
    }

    fn channel(&self, index: usize) -> ChannelInfo<'_> {
        if index < self.analog.len() {
            let ch = self.analog[index];
            ChannelInfo {
                name: self.osc.channel_name(ch),
                unit: self.osc.channel_unit(ch),
                scale: Some(self.osc.channel_real_k(ch)),
            }
        } else {
            let ch = self.digital[index - self.analog.len()];
            ChannelInfo {
                name: self.osc.channel_name(ch),
                unit: "",
                scale: None,
            }
        }
    }

    fn value(&self, index: usize, sample: usize) -> f32 {
        if index < self.analog.len() {
            self.osc.channel_value(self.analog[index], self.logical(sample)) as f32
        } else {
            self.osc
                .channel_value(self.digital[index - self.analog.len()], self.logical(sample)) as f32
        }
    }

    fn sample_count(&self) -> usize {
        self.range_len
    }

    fn sample_timestamp(&self, sample: usize) -> Timestamp {
        let period_micros = if self.identity.sample_rate_hz > 0.0 {
            1_000_000.0 / self.identity.sample_rate_hz
        } else {
            0.0
        };
        let start = self.osc.start_time().unwrap_or_default();
        start.add_micros((self.logical(sample) as f64 * period_micros as f64) as i64)
    }

    fn line_frequency(&self) -> f32 {
        self.identity.line_frequency_hz
    }

    fn sample_rate_hz(&self) -> f32 {
        self.identity.sample_rate_hz
    }
}

fn extend_name(stem: &str, suffix: &str) -> heapless::String<FILENAME_LEN> {
    let mut s: heapless::String<FILENAME_LEN> = heapless::String::new();
    let _ = s.push_str(stem);
    let _ = s.push_str(suffix);
    s
}

/// Writes `source`'s `.csv`, `.cfg` and `.dat` companions under `stem`, in
/// that order — `event_write`'s sequence, restoring the CSV call the
/// original left commented out.
pub fn write_buffer_files<const POOL: usize, const N: usize>(
    dir: &mut impl Directory,
    stem: &str,
    source: &BufferSource<'_, POOL, N>,
    data_time: Timestamp,
    trigger_time: Timestamp,
) -> crate::error::Result<()> {
    let sample_count = source.range_len;
    let timemult = if source.identity.sample_rate_hz > 0.0 {
        (1_000_000.0 / source.identity.sample_rate_hz) as u32
    } else {
        1
    };

    let csv_name = extend_name(stem, ".csv");
    dir.with_file(csv_name.as_str(), &mut |f| {
        csv::write(f, source, source.trigger, data_time)
    })?;

    let cfg_name = extend_name(stem, ".cfg");
    dir.with_file(cfg_name.as_str(), &mut |f| {
        comtrade::write_cfg(
            f,
            source,
            source.identity.station_name,
            source.identity.dev_id,
            data_time,
            trigger_time,
            timemult,
        )
    })?;

    let dat_name = extend_name(stem, ".dat");
    dir.with_file(dat_name.as_str(), &mut |f| {
        for sample in 0..sample_count {
            comtrade::append_dat(f, source, sample as u32, sample as u32)?;
        }
        Ok(())
    })?;

    Ok(())
}

/// Writes the full COMTRADE/CSV triple for a just-paused event oscillogram:
/// `event_DD.MM.YYYY_HH-MM-SS.{csv,cfg,dat}` over every committed sample.
pub fn write_event<const POOL: usize, const N: usize>(
    dir: &mut impl Directory,
    osc: &Oscillogram<POOL, N>,
    event: &crate::logger::Event,
    identity: &Identity<'_>,
) -> crate::error::Result<()> {
    let stem = super::fs::timestamped_name::<FILENAME_LEN>("event_", event.time);
    let data_time = osc.start_time().unwrap_or(event.time);
    let source = BufferSource::new(osc, 0..osc.committed_count(), event.trigger, identity);
    write_buffer_files(dir, stem.as_str(), &source, data_time, event.time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelRepr as CfgRepr, Source, ValueKind};
    use crate::oscillogram::{ValueSource, WrapMode};
    use crate::storage::fs::NullFs;

    struct ConstSource;
    impl ValueSource for ConstSource {
        fn analog_inst(&self, channel: usize) -> crate::q15::Q15 {
            (channel as i32 + 1) * 1000
        }
        fn analog_eff(&self, channel: usize) -> crate::q15::Q15 {
            (channel as i32 + 1) * 1000
        }
        fn digital_state(&self, channel: usize) -> bool {
            channel % 2 == 0
        }
    }

    fn sample_osc() -> Oscillogram<64, 3> {
        let mut osc: Oscillogram<64, 3> = Oscillogram::new(WrapMode::Wrap);
        osc.configure_channel(0, Source::Ain, CfgRepr::Val, ValueKind::Inst, 0, 1.0, "VA", "V", true);
        osc.configure_channel(1, Source::Ain, CfgRepr::Val, ValueKind::Inst, 1, 1.0, "VB", "V", true);
        osc.configure_channel(2, Source::Din, CfgRepr::Bit, ValueKind::Inst, 0, 1.0, "D1", "", true);
        osc.init_channels(1).unwrap();
        osc.set_enabled(true);
        let src = ConstSource;
        for i in 0..10 {
            osc.append(&src, Timestamp::new(i, 0));
        }
        osc
    }

    #[test]
    fn buffer_source_separates_analog_and_digital_channels() {
        let osc = sample_osc();
        let identity = Identity {
            station_name: "Station",
            dev_id: "DEV1",
            line_frequency_hz: 50.0,
            sample_rate_hz: 1600.0,
        };
        let source = BufferSource::new(&osc, 0..osc.committed_count(), Some(1), &identity);
        assert_eq!(source.analog_channel_count(), 2);
        assert_eq!(source.digital_channel_count(), 1);
        assert_eq!(source.analog_channel(0).id, "VA");
        assert_eq!(source.digital_channel(0).id, "D1");
    }

    #[test]
    fn write_event_produces_all_three_ordered_files() {
        let osc = sample_osc();
        let event = crate::logger::Event {
            time: Timestamp::new(100, 0),
            trigger: Some(0),
        };
        let identity = Identity {
            station_name: "Station",
            dev_id: "DEV1",
            line_frequency_hz: 50.0,
            sample_rate_hz: 1600.0,
        };
        let mut dir = NullFs;
        write_event(&mut dir, &osc, &event, &identity).unwrap();
    }

    #[test]
    fn write_buffer_files_honors_a_restricted_sample_range() {
        let osc = sample_osc();
        let identity = Identity {
            station_name: "Station",
            dev_id: "DEV1",
            line_frequency_hz: 50.0,
            sample_rate_hz: 1600.0,
        };
        let source = BufferSource::new(&osc, 2..5, None, &identity);
        assert_eq!(source.sample_count(), 3);
        let mut dir = NullFs;
        write_buffer_files(&mut dir, "trend_01.08.2026_00-00-00", &source, Timestamp::new(0, 0), Timestamp::new(0, 0))
            .unwrap();
    }
}
