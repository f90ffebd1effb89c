//! Configuration (`config.ini`) parsing.
//!
//! Grounded on the original firmware's `conf.c`: one read pass over the
//! file populates typed settings structs for every subsystem, in section
//! order `[time]`, `[log]`, `[ain<i>]`, `[din<i>]`, `[osc]`/`[osc<i>]`,
//! `[trig<i>]`. Unknown keys are ignored and missing keys default to
//! `0`/empty — every settings struct therefore implements
//! [`Default`] and parsing only ever overwrites fields it actually finds.

use heapless::String;
use ini_core::{Item, Parser};
use num_enum::TryFromPrimitive;

use crate::hal::{Civil, Timestamp};
use crate::q15::{self, Q15};

pub const NAME_LEN: usize = 16;
pub const UNIT_LEN: usize = 8;

/// One-shot RTC seed from `[time]`; `None` if the section was absent, in
/// which case the board's RTC is left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeSettings {
    pub sec: i32,
    pub min: i32,
    pub hour: i32,
    pub day: i32,
    pub mon: i32,
    pub year: i32,
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// `osc_ratio`: post-trigger share of the event oscillogram, Q15 in
    /// `[0, 1]`.
    pub osc_time_ratio: Q15,
    /// `station`: the recording station's name, written as the first field
    /// of every COMTRADE `.cfg` file.
    pub station_name: String<NAME_LEN>,
    /// `dev_id`: the recorder's device identifier, the second field of the
    /// same CFG line.
    pub dev_id: String<NAME_LEN>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            osc_time_ratio: q15::q15(0.5),
            station_name: String::new(),
            dev_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum ChannelKind {
    #[default]
    Dc = 0,
    Ac = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum EffKind {
    #[default]
    Avg = 0,
    Rms = 1,
}

#[derive(Debug, Clone, Default)]
pub struct AinSettings {
    pub kind: ChannelKind,
    pub eff_kind: EffKind,
    pub offset: u32,
    pub inst_gain: Q15,
    pub eff_gain: Q15,
    pub real_k: f32,
    pub name: String<NAME_LEN>,
    pub unit: String<UNIT_LEN>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum DinMode {
    #[default]
    Normal = 0,
    Inverted = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum DinFunction {
    #[default]
    None = 0,
    Reset = 1,
    Halt = 2,
}

#[derive(Debug, Clone, Default)]
pub struct DinSettings {
    pub mode: DinMode,
    pub function: DinFunction,
    pub time: Q15,
    pub name: String<NAME_LEN>,
}

/// Which kind of channel an oscillogram/trigger source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum Source {
    #[default]
    Ain = 0,
    Din = 1,
}

/// Instantaneous vs. effective value, for sources that have both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum ValueKind {
    #[default]
    Inst = 0,
    Eff = 1,
}

/// An oscillogram channel's storage representation: a packed Q15 value
/// sample, or a single packed bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum ChannelRepr {
    #[default]
    Val = 0,
    Bit = 1,
}

#[derive(Debug, Clone, Default)]
pub struct OscChannelSettings {
    pub src: Source,
    pub repr: ChannelRepr,
    pub src_kind: ValueKind,
    pub src_channel: usize,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct OscSettings {
    /// Decimation ratio from the DSP sample rate down to the oscillogram
    /// sample rate.
    pub rate: usize,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self { rate: 1 }
    }
}

/// OVF (over) vs. UDF (under) threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
#[repr(u8)]
pub enum CompareKind {
    #[default]
    Ovf = 0,
    Udf = 1,
}

#[derive(Debug, Clone, Default)]
pub struct TrigSettings {
    pub src: Source,
    pub src_channel: usize,
    pub src_kind: ValueKind,
    pub compare: CompareKind,
    /// Dwell time, Q15 seconds.
    pub time: Q15,
    /// Threshold, engineering units (converted to Q15 via the source
    /// channel's `real_k` at trigger-channel setup, not here).
    pub reference: f32,
    pub name: String<NAME_LEN>,
    pub enabled: bool,
}

/// The full parsed configuration, parameterized over the static channel
/// counts compiled into the board integration.
#[derive(Debug, Clone)]
pub struct Settings<const N_AIN: usize, const N_DIN: usize, const N_OSC: usize, const N_TRIG: usize>
{
    pub time: Option<TimeSettings>,
    pub log: LogSettings,
    pub ains: [AinSettings; N_AIN],
    pub dins: [DinSettings; N_DIN],
    pub osc: OscSettings,
    pub oscs: [OscChannelSettings; N_OSC],
    pub trigs: [TrigSettings; N_TRIG],
}

impl<const N_AIN: usize, const N_DIN: usize, const N_OSC: usize, const N_TRIG: usize> Default
    for Settings<N_AIN, N_DIN, N_OSC, N_TRIG>
{
    fn default() -> Self {
        Self {
            time: None,
            log: LogSettings::default(),
            ains: [(); N_AIN].map(|_| AinSettings::default()),
            dins: [(); N_DIN].map(|_| DinSettings::default()),
            osc: OscSettings::default(),
            oscs: [(); N_OSC].map(|_| OscChannelSettings::default()),
            trigs: [(); N_TRIG].map(|_| TrigSettings::default()),
        }
    }
}

fn parse_i64(value: Option<&str>, default: i64) -> i64 {
    value.and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(default)
}

fn parse_u32(value: Option<&str>, default: u32) -> u32 {
    parse_i64(value, default as i64).max(0) as u32
}

fn parse_usize(value: Option<&str>, default: usize) -> usize {
    parse_i64(value, default as i64).max(0) as usize
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim) {
        Some("0") => false,
        Some("1") => true,
        Some(s) => s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on"),
        None => default,
    }
}

fn parse_f32(value: Option<&str>, default: f32) -> f32 {
    value.and_then(|v| v.trim().parse::<f32>().ok()).unwrap_or(default)
}

/// Parses a decimal config field into Q15 by scaling into the fixed-point
/// range (`real_to_q15(x, 1.0)`), saturating out-of-range literals rather
/// than rejecting them — mirrors the original's `q15_sat()` clamp applied
/// immediately after every `ini_valuef` read.
fn parse_q15(value: Option<&str>, default: Q15) -> Q15 {
    match value {
        Some(v) => q15::real_to_q15(parse_f32(Some(v), 0.0), 1.0),
        None => default,
    }
}

fn store_name<const N: usize>(value: Option<&str>, fallback: &str) -> String<N> {
    let mut s = String::new();
    for c in value.unwrap_or(fallback).chars() {
        if s.push(c).is_err() {
            break;
        }
    }
    s
}

/// Splits a section name like `"ain3"` into its prefix and numeric suffix.
fn section_index(section: &str, prefix: &str) -> Option<usize> {
    section
        .strip_prefix(prefix)
        .and_then(|rest| rest.parse::<usize>().ok())
}

impl<const N_AIN: usize, const N_DIN: usize, const N_OSC: usize, const N_TRIG: usize>
    Settings<N_AIN, N_DIN, N_OSC, N_TRIG>
{
    /// Parses a `config.ini` document, applying each recognized key over a
    /// default-initialized settings struct.
    pub fn parse(text: &str) -> Self {
        let mut settings = Self::default();
        let mut section = heapless::String::<24>::new();

        for item in Parser::new(text) {
            match item {
                Item::Section(name) => {
                    section.clear();
                    let _ = section.push_str(name);
                }
                Item::Property(key, value) => {
                    settings.apply(section.as_str(), key, value);
                }
                Item::SectionEnd | Item::Blank | Item::Comment(_) | Item::Error(_) => {}
            }
        }

        settings
    }

    fn apply(&mut self, section: &str, key: &str, value: Option<&str>) {
        if section == "time" {
            self.apply_time(key, value);
        } else if section == "log" {
            self.apply_log(key, value);
        } else if section == "osc" {
            self.osc.rate = parse_usize(value.filter(|_| key == "rate"), self.osc.rate);
        } else if let Some(i) = section_index(section, "ain") {
            if i < N_AIN {
                self.apply_ain(i, key, value);
            }
        } else if let Some(i) = section_index(section, "din") {
            if i < N_DIN {
                self.apply_din(i, key, value);
            }
        } else if let Some(i) = section_index(section, "osc") {
            if i < N_OSC {
                self.apply_osc_channel(i, key, value);
            }
        } else if let Some(i) = section_index(section, "trig") {
            if i < N_TRIG {
                self.apply_trig(i, key, value);
            }
        }
    }

    fn apply_time(&mut self, key: &str, value: Option<&str>) {
        let time = self.time.get_or_insert_with(TimeSettings::default);
        match key {
            "sec" => time.sec = parse_i64(value, 0) as i32,
            "min" => time.min = parse_i64(value, 0) as i32,
            "hour" => time.hour = parse_i64(value, 0) as i32,
            "day" => time.day = parse_i64(value, 0) as i32,
            "mon" => time.mon = parse_i64(value, 0) as i32,
            "year" => time.year = parse_i64(value, 0) as i32,
            _ => {}
        }
    }

    fn apply_log(&mut self, key: &str, value: Option<&str>) {
        match key {
            "osc_ratio" => self.log.osc_time_ratio = parse_q15(value, self.log.osc_time_ratio),
            "station" => self.log.station_name = store_name(value, ""),
            "dev_id" => self.log.dev_id = store_name(value, ""),
            _ => {}
        }
    }

    fn apply_ain(&mut self, i: usize, key: &str, value: Option<&str>) {
        let ch = &mut self.ains[i];
        match key {
            "type" => {
                ch.kind = ChannelKind::try_from_primitive(parse_u32(value, 0) as u8)
                    .unwrap_or_default()
            }
            "eff_type" => {
                ch.eff_kind = EffKind::try_from_primitive(parse_u32(value, 0) as u8)
                    .unwrap_or_default()
            }
            "offset" => ch.offset = parse_u32(value, 0),
            "inst_gain" => ch.inst_gain = parse_q15(value, 0),
            "eff_gain" => ch.eff_gain = parse_q15(value, 0),
            "real_k" => ch.real_k = parse_f32(value, 0.0),
            "name" => ch.name = store_name(value, ""),
            "unit" => ch.unit = store_name(value, ""),
            "enabled" => ch.enabled = parse_bool(value, false),
            _ => {}
        }
    }

    fn apply_din(&mut self, i: usize, key: &str, value: Option<&str>) {
        let ch = &mut self.dins[i];
        match key {
            "mode" => {
                ch.mode = DinMode::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "type" => {
                ch.function =
                    DinFunction::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "time" => ch.time = parse_q15(value, 0),
            "name" => ch.name = store_name(value, ""),
            _ => {}
        }
    }

    fn apply_osc_channel(&mut self, i: usize, key: &str, value: Option<&str>) {
        let ch = &mut self.oscs[i];
        match key {
            "src" => {
                ch.src = Source::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "type" => {
                ch.repr =
                    ChannelRepr::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "src_type" => {
                ch.src_kind =
                    ValueKind::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "src_channel" => ch.src_channel = parse_usize(value, 0),
            "enabled" => ch.enabled = parse_bool(value, false),
            _ => {}
        }
    }

    /// The one-shot RTC seed requested by `[time]`, if the section was
    /// present. `None` means the caller must leave the board's RTC alone.
    ///
    /// `WallClock::set` takes a [`Timestamp`], not the calendar fields
    /// `conf.c` parses directly into `mktime`/`settimeofday`, so this
    /// converts through [`Timestamp::from_civil`] rather than handing the
    /// caller raw `TimeSettings`.
    pub fn requested_clock_set(&self) -> Option<Timestamp> {
        let t = self.time?;
        Some(Timestamp::from_civil(Civil {
            year: t.year as i64,
            month: t.mon.max(0) as u32,
            day: t.day.max(0) as u32,
            hour: t.hour.max(0) as u32,
            minute: t.min.max(0) as u32,
            second: t.sec.max(0) as u32,
            micros: 0,
        }))
    }

    fn apply_trig(&mut self, i: usize, key: &str, value: Option<&str>) {
        let ch = &mut self.trigs[i];
        match key {
            "src" => {
                ch.src = Source::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "src_channel" => ch.src_channel = parse_usize(value, 0),
            "src_type" => {
                ch.src_kind =
                    ValueKind::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "type" => {
                ch.compare =
                    CompareKind::try_from_primitive(parse_u32(value, 0) as u8).unwrap_or_default()
            }
            "time" => ch.time = parse_q15(value, 0),
            "ref" => ch.reference = parse_f32(value, 0.0),
            "name" => ch.name = store_name(value, ""),
            "enabled" => ch.enabled = parse_bool(value, false),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ain_channel_parses_per_scenario_one() {
        let text = "\
[ain0]
type=1
eff_type=1
offset=2048
inst_gain=32767
eff_gain=32767
real_k=65536
name=Ua
unit=V
enabled=1

[osc]
rate=1
";
        let settings: Settings<1, 1, 1, 1> = Settings::parse(text);
        let ch = &settings.ains[0];
        assert_eq!(ch.kind, ChannelKind::Ac);
        assert_eq!(ch.eff_kind, EffKind::Rms);
        assert_eq!(ch.offset, 2048);
        assert!(ch.enabled);
        assert_eq!(ch.name.as_str(), "Ua");
        assert_eq!(ch.unit.as_str(), "V");
        assert_eq!(ch.real_k, 65536.0);
        assert_eq!(settings.osc.rate, 1);
    }

    #[test]
    fn missing_keys_default_to_zero() {
        let settings: Settings<2, 0, 0, 0> = Settings::parse("[ain0]\nenabled=1\n");
        assert_eq!(settings.ains[0].offset, 0);
        assert_eq!(settings.ains[1].offset, 0);
        assert!(!settings.ains[1].enabled);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings: Settings<1, 0, 0, 0> =
            Settings::parse("[ain0]\nbogus_key=123\nenabled=1\n");
        assert!(settings.ains[0].enabled);
    }

    #[test]
    fn time_section_absent_leaves_none() {
        let settings: Settings<0, 0, 0, 0> = Settings::parse("[log]\nosc_ratio=0.5\n");
        assert!(settings.time.is_none());
    }

    #[test]
    fn trig_reference_stays_in_engineering_units() {
        let text = "[trig0]\nsrc=0\nsrc_channel=0\ntype=0\ntime=0.05\nref=1.2\nenabled=1\n";
        let settings: Settings<1, 0, 0, 1> = Settings::parse(text);
        let trig = &settings.trigs[0];
        assert_eq!(trig.reference, 1.2);
        assert_eq!(trig.compare, CompareKind::Ovf);
        assert!(trig.enabled);
    }

    #[test]
    fn out_of_range_section_index_is_ignored() {
        let settings: Settings<1, 0, 0, 0> = Settings::parse("[ain5]\nenabled=1\n");
        assert!(!settings.ains[0].enabled);
    }

    #[test]
    fn log_section_parses_station_identity() {
        let text = "[log]\nosc_ratio=0.25\nstation=Substation 4\ndev_id=REC-12\n";
        let settings: Settings<0, 0, 0, 0> = Settings::parse(text);
        assert_eq!(settings.log.station_name.as_str(), "Substation 4");
        assert_eq!(settings.log.dev_id.as_str(), "REC-12");
    }

    #[test]
    fn requested_clock_set_is_none_without_time_section() {
        let settings: Settings<0, 0, 0, 0> = Settings::parse("[log]\nosc_ratio=0.5\n");
        assert!(settings.requested_clock_set().is_none());
    }

    #[test]
    fn requested_clock_set_converts_time_section_to_a_timestamp() {
        let text = "[time]\nyear=2026\nmon=8\nday=1\nhour=12\nmin=34\nsec=56\n";
        let settings: Settings<0, 0, 0, 0> = Settings::parse(text);
        let requested = settings.requested_clock_set().unwrap();
        assert_eq!(requested, crate::hal::Timestamp::new(1_785_587_696, 0));
    }
}
