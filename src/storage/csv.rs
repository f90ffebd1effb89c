//! The human-readable CSV companion written alongside every COMTRADE event
//! and trend file.
//!
//! A header block (`Date`, `Time`, `Trigger`, `Freq`, `Rate`,
//! `Samples`), a channel block (`Channels: N`, `Name`, `Unit`, optional
//! `Scale`), then one `Data <timestamp>` row per sample with
//! semicolon-separated channel values. There is no equivalent file in the
//! original firmware's source tree (the CSV companion is a retained
//! feature of the deployed device not reflected in the archived sources
//! available here); the writer follows the same line-at-a-time,
//! small-stack-buffer style as [`crate::storage::comtrade`].

use crate::hal::Timestamp;
use crate::storage::fs::{write_fmt, WriteFile};

/// One channel's CSV metadata: name, unit, and an optional engineering
/// scale factor (omitted for digital channels).
pub struct ChannelInfo<'a> {
    pub name: &'a str,
    pub unit: &'a str,
    pub scale: Option<f32>,
}

/// Supplies everything a CSV write needs.
pub trait CsvSource {
    fn channel_count(&self) -> usize;
    fn channel(&self, index: usize) -> ChannelInfo<'_>;
    fn value(&self, index: usize, sample: usize) -> f32;

    fn sample_count(&self) -> usize;
    fn sample_timestamp(&self, sample: usize) -> Timestamp;

    fn line_frequency(&self) -> f32;
    fn sample_rate_hz(&self) -> f32;
}

fn write_line(file: &mut dyn WriteFile) -> crate::error::Result<()> {
    file.write(b"\r\n")
}

fn write_datetime_fields(file: &mut dyn WriteFile, time: Timestamp) -> crate::error::Result<()> {
    let c = time.to_civil();
    write_fmt(file, format_args!("Date,{:02}.{:02}.{:04}", c.day, c.month, c.year))?;
    write_line(file)?;
    write_fmt(
        file,
        format_args!("Time,{:02}:{:02}:{:02}.{:06}", c.hour, c.minute, c.second, c.micros),
    )?;
    write_line(file)
}

/// Writes the complete CSV companion for one event or trend segment.
pub fn write(
    file: &mut dyn WriteFile,
    source: &impl CsvSource,
    trigger: Option<usize>,
    data_time: Timestamp,
) -> crate::error::Result<()> {
    write_datetime_fields(file, data_time)?;

    match trigger {
        Some(channel) => write_fmt(file, format_args!("Trigger,{}", channel + 1))?,
        None => write_fmt(file, format_args!("Trigger,"))?,
    }
    write_line(file)?;

    write_fmt(file, format_args!("Freq,{}", source.line_frequency()))?;
    write_line(file)?;
    write_fmt(file, format_args!("Rate,{}", source.sample_rate_hz()))?;
    write_line(file)?;
    write_fmt(file, format_args!("Samples,{}", source.sample_count()))?;
    write_line(file)?;

    let channels = source.channel_count();
    write_fmt(file, format_args!("Channels: {}", channels))?;
    write_line(file)?;

    write_fmt(file, format_args!("Name"))?;
    for i in 0..channels {
        write_fmt(file, format_args!(";{}", source.channel(i).name))?;
    }
    write_line(file)?;

    write_fmt(file, format_args!("Unit"))?;
    for i in 0..channels {
        write_fmt(file, format_args!(";{}", source.channel(i).unit))?;
    }
    write_line(file)?;

    if (0..channels).any(|i| source.channel(i).scale.is_some()) {
        write_fmt(file, format_args!("Scale"))?;
        for i in 0..channels {
            match source.channel(i).scale {
                Some(scale) => write_fmt(file, format_args!(";{}", scale))?,
                None => write_fmt(file, format_args!(";"))?,
            }
        }
        write_line(file)?;
    }

    for sample in 0..source.sample_count() {
        let c = source.sample_timestamp(sample).to_civil();
        write_fmt(
            file,
            format_args!("Data {:02}:{:02}:{:02}.{:06}", c.hour, c.minute, c.second, c.micros),
        )?;
        for i in 0..channels {
            write_fmt(file, format_args!(";{}", source.value(i, sample)))?;
        }
        write_line(file)?;
    }

    file.flush()
}
