//! COMTRADE 1999 CFG/DAT writer.
//!
//! Grounded on the original firmware's `comtrade.c`: the ASCII `.cfg`
//! header lines are reproduced field-for-field, and `.dat` is IEEE
//! COMTRADE's binary record layout (two little-endian `u32`s — sample
//! number and timestamp — followed by one `i16` per analog channel and one
//! packed `i16` per 16 digital channels, LSB first).
//!
//! The original threads four function-pointer callbacks through a
//! `comtrade_t` struct to fetch channel metadata and sample values; this is
//! redesigned as the [`ComtradeSource`] capability trait (the same pattern
//! [`crate::oscillogram::ValueSource`] uses), so a caller just implements
//! one trait instead of wiring four raw function pointers.

use crate::hal::Timestamp;
use crate::storage::fs::{write_fmt, WriteFile};

pub const STANDARD_YEAR: u32 = 1999;
pub const DAT_FILE_TYPE: &str = "BINARY";

/// An analog channel's COMTRADE metadata (CFG line 2+).
pub struct AnalogChannelInfo<'a> {
    pub id: &'a str,
    pub phase: &'a str,
    pub component: &'a str,
    pub unit: &'a str,
    /// Scale factor `a` and offset `b`: `primary_value = raw * a + b`.
    pub a: f32,
    pub b: f32,
    pub skew_micros: u32,
    pub min: i16,
    pub max: i16,
    pub primary_ratio: f32,
    pub secondary_ratio: f32,
    /// `true` for primary ('p'), `false` for secondary ('s').
    pub primary: bool,
}

/// A digital channel's COMTRADE metadata.
pub struct DigitalChannelInfo<'a> {
    pub id: &'a str,
    pub phase: &'a str,
    pub component: &'a str,
    pub normal_state: bool,
}

/// One declared sample rate segment: `(rate_hz, last_sample_number)`.
pub struct SampleRate {
    pub rate_hz: f32,
    pub end_sample: u32,
}

/// Supplies everything a CFG/DAT write needs; implemented by the recorder's
/// event/trend buffer adapters.
pub trait ComtradeSource {
    fn analog_channel_count(&self) -> usize;
    fn analog_channel(&self, index: usize) -> AnalogChannelInfo<'_>;
    fn analog_value(&self, index: usize, sample: usize) -> i16;

    fn digital_channel_count(&self) -> usize;
    fn digital_channel(&self, index: usize) -> DigitalChannelInfo<'_>;
    fn digital_value(&self, index: usize, sample: usize) -> bool;

    fn line_frequency(&self) -> f32;
    /// Declared sample rate segments; an empty slice means "unknown", which
    /// writes the single `0,9999999999` sentinel line.
    fn sample_rates(&self) -> &[SampleRate];
}

fn write_line(file: &mut dyn WriteFile) -> crate::error::Result<()> {
    file.write(b"\r\n")
}

fn write_analog_channel_line(
    file: &mut dyn WriteFile,
    index: usize,
    channel: &AnalogChannelInfo<'_>,
) -> crate::error::Result<()> {
    write_fmt(
        file,
        format_args!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            index + 1,
            channel.id,
            channel.phase,
            channel.component,
            channel.unit,
            channel.a,
            channel.b,
            channel.skew_micros,
            channel.min,
            channel.max,
            channel.primary_ratio,
            channel.secondary_ratio,
            if channel.primary { 'p' } else { 's' },
        ),
    )?;
    write_line(file)
}

fn write_digital_channel_line(
    file: &mut dyn WriteFile,
    index: usize,
    channel: &DigitalChannelInfo<'_>,
) -> crate::error::Result<()> {
    write_fmt(
        file,
        format_args!(
            "{},{},{},{},{}",
            index + 1,
            channel.id,
            channel.phase,
            channel.component,
            channel.normal_state as u8,
        ),
    )?;
    write_line(file)
}

fn write_datetime(file: &mut dyn WriteFile, time: Timestamp) -> crate::error::Result<()> {
    let c = time.to_civil();
    let usec = time.micros.min(999_999);
    write_fmt(
        file,
        format_args!(
            "{:02}/{:02}/{:04},{:02}:{:02}:{:02}.{:06}",
            c.day, c.month, c.year, c.hour, c.minute, c.second, usec
        ),
    )?;
    write_line(file)
}

/// Writes a complete `.cfg` file.
pub fn write_cfg(
    file: &mut dyn WriteFile,
    source: &impl ComtradeSource,
    station_name: &str,
    device_id: &str,
    data_time: Timestamp,
    trigger_time: Timestamp,
    timemult: u32,
) -> crate::error::Result<()> {
    write_fmt(file, format_args!("{},{},{}", station_name, device_id, STANDARD_YEAR))?;
    write_line(file)?;

    let analog_count = source.analog_channel_count();
    let digital_count = source.digital_channel_count();
    write_fmt(
        file,
        format_args!("{},{}A,{}D", analog_count + digital_count, analog_count, digital_count),
    )?;
    write_line(file)?;

    for i in 0..analog_count {
        write_analog_channel_line(file, i, &source.analog_channel(i))?;
    }
    for i in 0..digital_count {
        write_digital_channel_line(file, i, &source.digital_channel(i))?;
    }

    write_fmt(file, format_args!("{}", source.line_frequency()))?;
    write_line(file)?;

    let rates = source.sample_rates();
    write_fmt(file, format_args!("{}", rates.len()))?;
    write_line(file)?;
    if rates.is_empty() {
        file.write(b"0,9999999999\r\n")?;
    } else {
        for rate in rates {
            write_fmt(file, format_args!("{},{}", rate.rate_hz, rate.end_sample))?;
            write_line(file)?;
        }
    }

    write_datetime(file, data_time)?;
    write_datetime(file, trigger_time)?;

    write_fmt(file, format_args!("{}", DAT_FILE_TYPE))?;
    write_line(file)?;

    write_fmt(file, format_args!("{}", timemult))?;
    write_line(file)?;

    file.flush()
}

/// The number of bytes one `.dat` record occupies for `source`'s channel
/// layout: two `u32` header fields, one `i16` per analog channel, and one
/// packed `i16` per 16 digital channels.
pub fn dat_record_size(source: &impl ComtradeSource) -> usize {
    let digital_words = (source.digital_channel_count() + 15) / 16;
    8 + source.analog_channel_count() * 2 + digital_words * 2
}

/// Appends one binary `.dat` record for `sample_index` (0-based) with the
/// given timestamp offset in microseconds from the file's trigger time.
pub fn append_dat(
    file: &mut dyn WriteFile,
    source: &impl ComtradeSource,
    sample_index: u32,
    timestamp_micros: u32,
) -> crate::error::Result<()> {
    let mut header = [0u8; 8];
    header[0..4].copy_from_slice(&(sample_index + 1).to_le_bytes());
    header[4..8].copy_from_slice(&timestamp_micros.to_le_bytes());
    file.write(&header)?;

    for i in 0..source.analog_channel_count() {
        let value = source.analog_value(i, sample_index as usize);
        file.write(&value.to_le_bytes())?;
    }

    let digital_count = source.digital_channel_count();
    let mut word: i16 = 0;
    let mut bit = 0u32;
    for i in 0..digital_count {
        if source.digital_value(i, sample_index as usize) {
            word |= 1 << bit;
        }
        bit += 1;
        if bit == 16 {
            file.write(&word.to_le_bytes())?;
            word = 0;
            bit = 0;
        }
    }
    if bit != 0 {
        file.write(&word.to_le_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fs::{Directory, NullFs};

    struct FixedSource;
    impl ComtradeSource for FixedSource {
        fn analog_channel_count(&self) -> usize {
            2
        }
        fn analog_channel(&self, index: usize) -> AnalogChannelInfo<'_> {
            AnalogChannelInfo {
                id: if index == 0 { "VA" } else { "VB" },
                phase: "A",
                component: "",
                unit: "V",
                a: 1.0,
                b: 0.0,
                skew_micros: 0,
                min: -32767,
                max: 32767,
                primary_ratio: 1.0,
                secondary_ratio: 1.0,
                primary: true,
            }
        }
        fn analog_value(&self, index: usize, sample: usize) -> i16 {
            (index as i16 + 1) * 100 + sample as i16
        }
        fn digital_channel_count(&self) -> usize {
            17
        }
        fn digital_channel(&self, _index: usize) -> DigitalChannelInfo<'_> {
            DigitalChannelInfo {
                id: "D",
                phase: "",
                component: "",
                normal_state: false,
            }
        }
        fn digital_value(&self, index: usize, sample: usize) -> bool {
            (index + sample) % 3 == 0
        }
        fn line_frequency(&self) -> f32 {
            50.0
        }
        fn sample_rates(&self) -> &[SampleRate] {
            &[]
        }
    }

    #[test]
    fn cfg_write_succeeds_and_flushes() {
        let source = FixedSource;
        let mut fs = NullFs;
        fs.with_file("EVENT0001.CFG", &mut |f| {
            write_cfg(
                f,
                &source,
                "Station",
                "DEV1",
                Timestamp::new(0, 0),
                Timestamp::new(0, 0),
                1,
            )
        })
        .unwrap();
    }

    #[test]
    fn dat_record_size_accounts_for_digital_word_packing() {
        let source = FixedSource;
        // 8 header bytes + 2 analog * 2 bytes + 2 digital words (17 bits -> 2 words) * 2 bytes.
        assert_eq!(dat_record_size(&source), 8 + 4 + 4);
    }

    #[test]
    fn append_dat_writes_one_record_per_sample() {
        let source = FixedSource;
        let mut fs = NullFs;
        fs.with_file("EVENT0001.DAT", &mut |f| append_dat(f, &source, 0, 0))
            .unwrap();
    }
}
