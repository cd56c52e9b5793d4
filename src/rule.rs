use std::{cmp::Ordering, str::FromStr, sync::Arc};

use {
    jiff::{Span, ToSpan, Zoned, civil::Weekday},
    serde::Serialize,
};

use crate::error::{Error, ParseError, ValidationError};

/// An RFC 5545 recurrence rule.
///
/// A `Rule` is immutable once built. Changing a rule means going back
/// through [`Rule::to_builder`] and building a new one. Clones are cheap:
/// the field data lives behind an `Arc` and is shared.
///
/// A rule carries no starting point. The anchor (DTSTART) is supplied when
/// occurrences are generated, so one rule can be expanded from many
/// different anchors.
#[derive(Clone, Debug)]
pub struct Rule {
    inner: Arc<RuleInner>,
}

#[derive(Debug)]
pub(crate) struct RuleInner {
    pub(crate) freq: Frequency,
    pub(crate) interval: i32,
    /// The frequency span multiplied by the interval. Computed once at
    /// construction, after validation has proven it representable.
    pub(crate) step: Span,
    pub(crate) count: Option<u32>,
    pub(crate) until: Option<Zoned>,
    pub(crate) week_start: Weekday,
    pub(crate) by_month: Box<[i8]>,
    // The negative-capable lists count backwards from the end of their
    // period: -1 is the last week/day/position.
    pub(crate) by_week: Box<[i8]>,
    pub(crate) by_year_day: Box<[i16]>,
    pub(crate) by_month_day: Box<[i8]>,
    pub(crate) by_week_day: Box<[ByWeekday]>,
    pub(crate) by_hour: Box<[i8]>,
    pub(crate) by_minute: Box<[i8]>,
    pub(crate) by_second: Box<[i8]>,
    pub(crate) by_set_pos: Box<[i32]>,
}

impl Rule {
    /// Returns a builder for a rule at the given frequency.
    pub fn builder(freq: Frequency) -> RuleBuilder {
        RuleBuilder::new(freq)
    }

    /// The rule's frequency.
    pub fn frequency(&self) -> Frequency {
        self.inner.freq
    }

    /// The rule's interval. Defaults to `1`.
    pub fn interval(&self) -> i32 {
        self.inner.interval
    }

    /// The total number of occurrences this rule produces, if bounded by
    /// COUNT.
    pub fn count(&self) -> Option<u32> {
        self.inner.count
    }

    /// The instant after which no more occurrences are produced, if bounded
    /// by UNTIL.
    pub fn until(&self) -> Option<&Zoned> {
        self.inner.until.as_ref()
    }

    /// The first day of the week, for week numbering. Defaults to Monday.
    pub fn week_start(&self) -> Weekday {
        self.inner.week_start
    }

    /// Returns the diagnostic view of this rule's fields.
    pub fn properties(&self) -> Properties {
        Properties::from(self)
    }

    /// Returns a builder seeded with this rule's fields, for building a
    /// modified copy.
    pub fn to_builder(&self) -> RuleBuilder {
        let r = &*self.inner;
        let mut builder = RuleBuilder::new(r.freq);
        builder.interval(r.interval).week_start(r.week_start);
        if let Some(count) = r.count {
            builder.count(count);
        }
        if let Some(ref until) = r.until {
            builder.until(until.clone());
        }
        builder
            .by_month(r.by_month.iter().copied())
            .by_week(r.by_week.iter().copied())
            .by_year_day(r.by_year_day.iter().copied())
            .by_month_day(r.by_month_day.iter().copied())
            .by_week_day(r.by_week_day.iter().copied())
            .by_hour(r.by_hour.iter().copied())
            .by_minute(r.by_minute.iter().copied())
            .by_second(r.by_second.iter().copied())
            .by_set_pos(r.by_set_pos.iter().copied());
        builder
    }

    /// Re-checks this rule's fields against their RFC 5545 constraints.
    ///
    /// Rules built through [`RuleBuilder`] or the parser have already passed
    /// these checks; this is for callers that want to re-assert them. It is
    /// idempotent and has no side effects.
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate::check_builder(&self.to_builder())?;
        Ok(())
    }

    pub(crate) fn inner(&self) -> &RuleInner {
        &self.inner
    }
}

impl FromStr for Rule {
    type Err = Error;

    /// Parses a bare `RRULE` line, with or without the `RRULE:` prefix.
    fn from_str(s: &str) -> Result<Rule, Error> {
        crate::parse::rule_line(s)
    }
}

impl Eq for Rule {}

impl PartialEq for Rule {
    fn eq(&self, rhs: &Rule) -> bool {
        let (a, b) = (&*self.inner, &*rhs.inner);
        a.freq == b.freq
            && a.interval == b.interval
            && a.count == b.count
            && a.until == b.until
            && a.week_start == b.week_start
            && a.by_month == b.by_month
            && a.by_week == b.by_week
            && a.by_year_day == b.by_year_day
            && a.by_month_day == b.by_month_day
            && a.by_week_day == b.by_week_day
            && a.by_hour == b.by_hour
            && a.by_minute == b.by_minute
            && a.by_second == b.by_second
            && a.by_set_pos == b.by_set_pos
    }
}

/// A builder for constructing a valid [`Rule`].
///
/// List-valued setters append; calling `by_month` twice accumulates both
/// sets of months. Values are validated, sorted and de-duplicated by
/// [`RuleBuilder::build`], which fails fast on anything outside its RFC
/// range rather than deferring the error to generation.
#[derive(Clone, Debug)]
pub struct RuleBuilder {
    pub(crate) freq: Frequency,
    pub(crate) interval: i32,
    pub(crate) count: Option<u32>,
    pub(crate) until: Option<Zoned>,
    pub(crate) week_start: Weekday,
    pub(crate) by_month: Vec<i8>,
    pub(crate) by_week: Vec<i8>,
    pub(crate) by_year_day: Vec<i16>,
    pub(crate) by_month_day: Vec<i8>,
    pub(crate) by_week_day: Vec<ByWeekday>,
    pub(crate) by_hour: Vec<i8>,
    pub(crate) by_minute: Vec<i8>,
    pub(crate) by_second: Vec<i8>,
    pub(crate) by_set_pos: Vec<i32>,
}

impl RuleBuilder {
    fn new(freq: Frequency) -> RuleBuilder {
        RuleBuilder {
            freq,
            interval: 1,
            count: None,
            until: None,
            week_start: Weekday::Monday,
            by_month: vec![],
            by_week: vec![],
            by_year_day: vec![],
            by_month_day: vec![],
            by_week_day: vec![],
            by_hour: vec![],
            by_minute: vec![],
            by_second: vec![],
            by_set_pos: vec![],
        }
    }

    /// Validates every field and builds the rule.
    pub fn build(&self) -> Result<Rule, Error> {
        fn sorted<T: Clone + Ord>(values: &[T]) -> Box<[T]> {
            let mut values = values.to_vec();
            values.sort();
            values.dedup();
            values.into_boxed_slice()
        }

        crate::validate::check_builder(self)?;
        let step = self.freq.to_span(self.interval).ok_or_else(|| {
            ValidationError::IntervalOverflow {
                value: i64::from(self.interval),
                freq: self.freq.as_token(),
            }
        })?;
        let inner = Arc::new(RuleInner {
            freq: self.freq,
            interval: self.interval,
            step,
            count: self.count,
            until: self.until.clone(),
            week_start: self.week_start,
            by_month: sorted(&self.by_month),
            by_week: sorted(&self.by_week),
            by_year_day: sorted(&self.by_year_day),
            by_month_day: sorted(&self.by_month_day),
            by_week_day: sorted(&self.by_week_day),
            by_hour: sorted(&self.by_hour),
            by_minute: sorted(&self.by_minute),
            by_second: sorted(&self.by_second),
            by_set_pos: sorted(&self.by_set_pos),
        });
        Ok(Rule { inner })
    }

    pub fn interval(&mut self, interval: i32) -> &mut RuleBuilder {
        self.interval = interval;
        self
    }

    pub fn count(&mut self, count: u32) -> &mut RuleBuilder {
        self.count = Some(count);
        self
    }

    pub fn until(&mut self, until: Zoned) -> &mut RuleBuilder {
        self.until = Some(until);
        self
    }

    pub fn week_start(&mut self, weekday: Weekday) -> &mut RuleBuilder {
        self.week_start = weekday;
        self
    }

    pub fn by_month(
        &mut self,
        months: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_month.extend(months);
        self
    }

    pub fn by_week(
        &mut self,
        weeks: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_week.extend(weeks);
        self
    }

    pub fn by_year_day(
        &mut self,
        days: impl IntoIterator<Item = i16>,
    ) -> &mut RuleBuilder {
        self.by_year_day.extend(days);
        self
    }

    pub fn by_month_day(
        &mut self,
        days: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_month_day.extend(days);
        self
    }

    pub fn by_week_day(
        &mut self,
        weekdays: impl IntoIterator<Item = ByWeekday>,
    ) -> &mut RuleBuilder {
        self.by_week_day.extend(weekdays);
        self
    }

    pub fn by_hour(
        &mut self,
        hours: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_hour.extend(hours);
        self
    }

    pub fn by_minute(
        &mut self,
        minutes: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_minute.extend(minutes);
        self
    }

    pub fn by_second(
        &mut self,
        seconds: impl IntoIterator<Item = i8>,
    ) -> &mut RuleBuilder {
        self.by_second.extend(seconds);
        self
    }

    pub fn by_set_pos(
        &mut self,
        positions: impl IntoIterator<Item = i32>,
    ) -> &mut RuleBuilder {
        self.by_set_pos.extend(positions);
        self
    }
}

/// The base repeating period of a rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// The wire token for this frequency, e.g. `DAILY`.
    pub fn as_token(self) -> &'static str {
        match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    /// One period at this frequency, times `interval`.
    ///
    /// Returns `None` when the multiplied span exceeds what a calendar span
    /// can represent.
    pub(crate) fn to_span(self, interval: i32) -> Option<Span> {
        let unit = match self {
            Frequency::Secondly => 1.second(),
            Frequency::Minutely => 1.minute(),
            Frequency::Hourly => 1.hour(),
            Frequency::Daily => 1.day(),
            Frequency::Weekly => 1.week(),
            Frequency::Monthly => 1.month(),
            Frequency::Yearly => 1.year(),
        };
        unit.checked_mul(i64::from(interval)).ok()
    }
}

impl FromStr for Frequency {
    type Err = ParseError;

    /// Parses a frequency token case-insensitively: both the wire form
    /// (`DAILY`) and the friendly form (`Daily`) are accepted.
    fn from_str(s: &str) -> Result<Frequency, ParseError> {
        use self::Frequency::*;

        let freq = match &*s.to_ascii_lowercase() {
            "secondly" => Secondly,
            "minutely" => Minutely,
            "hourly" => Hourly,
            "daily" => Daily,
            "weekly" => Weekly,
            "monthly" => Monthly,
            "yearly" => Yearly,
            _ => {
                return Err(ParseError::UnknownFrequency {
                    token: s.to_string(),
                });
            }
        };
        Ok(freq)
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// One entry of a BYDAY list: either every occurrence of a weekday within
/// the period, or a specific one counted from the start (positive) or end
/// (negative) of the period.
///
/// `Ord` is implemented so BYDAY lists can be sorted and de-duplicated. The
/// ordering is arbitrary (a real weekday order would need WKST) and nothing
/// in generation relies on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ByWeekday {
    /// Every such weekday in the period, e.g. `TU`.
    Every(Weekday),
    /// The nth such weekday in the period, e.g. `2TU` or `-1FR`.
    Nth { nth: i8, weekday: Weekday },
}

impl ByWeekday {
    /// True when the entry admits the given weekday.
    ///
    /// Only meaningful for `Every` entries. Rule validation guarantees that
    /// `Nth` entries never reach the frequencies that filter by weekday
    /// (anything below monthly), so hitting one here is a bug.
    pub(crate) fn admits(self, weekday: Weekday) -> bool {
        match self {
            ByWeekday::Every(wd) => wd == weekday,
            ByWeekday::Nth { .. } => unreachable!(),
        }
    }
}

impl Ord for ByWeekday {
    fn cmp(&self, rhs: &ByWeekday) -> Ordering {
        fn key(bwd: &ByWeekday) -> (i8, i8, i8) {
            match *bwd {
                ByWeekday::Every(wd) => (0, 0, wd.to_monday_one_offset()),
                ByWeekday::Nth { nth, weekday } => {
                    (1, nth, weekday.to_monday_one_offset())
                }
            }
        }
        key(self).cmp(&key(rhs))
    }
}

impl PartialOrd for ByWeekday {
    fn partial_cmp(&self, rhs: &ByWeekday) -> Option<Ordering> {
        Some(self.cmp(rhs))
    }
}

impl FromStr for ByWeekday {
    type Err = ParseError;

    /// Parses a BYDAY token: `MO`, `mo`, `2TU`, `-1FR`, `+3sa`.
    fn from_str(s: &str) -> Result<ByWeekday, ParseError> {
        let invalid = || ParseError::InvalidValue {
            name: "BYDAY",
            value: s.to_string(),
        };
        let at = s
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(invalid)?;
        let (ordinal, code) = s.split_at(at);
        let weekday = parse_weekday(code).ok_or_else(invalid)?;
        if ordinal.is_empty() {
            return Ok(ByWeekday::Every(weekday));
        }
        let nth = ordinal.parse::<i8>().map_err(|_| invalid())?;
        Ok(ByWeekday::Nth { nth, weekday })
    }
}

impl std::fmt::Display for ByWeekday {
    /// Writes the wire form: `TU` or `2TU`.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ByWeekday::Every(weekday) => f.write_str(weekday_token(weekday)),
            ByWeekday::Nth { nth, weekday } => {
                write!(f, "{nth}{}", weekday_token(weekday))
            }
        }
    }
}

/// The two-letter wire code for a weekday.
pub(crate) fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Monday => "MO",
        Weekday::Tuesday => "TU",
        Weekday::Wednesday => "WE",
        Weekday::Thursday => "TH",
        Weekday::Friday => "FR",
        Weekday::Saturday => "SA",
        Weekday::Sunday => "SU",
    }
}

/// Parses a weekday name case-insensitively. The wire codes (`MO`),
/// three-letter abbreviations and full names are all accepted.
pub(crate) fn parse_weekday(s: &str) -> Option<Weekday> {
    let weekday = match &*s.to_ascii_lowercase() {
        "mo" | "mon" | "monday" => Weekday::Monday,
        "tu" | "tue" | "tuesday" => Weekday::Tuesday,
        "we" | "wed" | "wednesday" => Weekday::Wednesday,
        "th" | "thu" | "thursday" => Weekday::Thursday,
        "fr" | "fri" | "friday" => Weekday::Friday,
        "sa" | "sat" | "saturday" => Weekday::Saturday,
        "su" | "sun" | "sunday" => Weekday::Sunday,
        _ => return None,
    };
    Some(weekday)
}

/// A read-only projection of a rule's fields for introspection.
///
/// Everything is rendered in wire-adjacent spellings (`freq: "Daily"`,
/// `week_start: "MO"`, weekday entries as a bare code or an
/// `(ordinal, code)` pair), so the view serializes into the shape foreign
/// callers expect. A `Properties` can be converted back into a [`Rule`]
/// fallibly; that conversion is where a hand-rolled view with a bogus
/// frequency string gets rejected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Properties {
    pub freq: String,
    pub interval: i32,
    pub count: Option<u32>,
    /// RFC 3339 with millisecond precision, when the rule has UNTIL.
    pub until: Option<String>,
    pub week_start: String,
    pub by_set_pos: Vec<i32>,
    pub by_month: Vec<i8>,
    pub by_month_day: Vec<i8>,
    pub by_year_day: Vec<i16>,
    pub by_week_no: Vec<i8>,
    pub by_weekday: Vec<WeekdayEntry>,
    pub by_hour: Vec<i8>,
    pub by_minute: Vec<i8>,
    pub by_second: Vec<i8>,
}

/// One BYDAY entry in a [`Properties`] view: a bare weekday code, or an
/// `(ordinal, code)` pair such as `(2, "TU")` for the second Tuesday.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WeekdayEntry {
    Every(String),
    Nth(i8, String),
}

impl From<&Rule> for Properties {
    fn from(rule: &Rule) -> Properties {
        let r = rule.inner();
        let freq = match r.freq {
            Frequency::Secondly => "Secondly",
            Frequency::Minutely => "Minutely",
            Frequency::Hourly => "Hourly",
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
            Frequency::Yearly => "Yearly",
        };
        Properties {
            freq: freq.to_string(),
            interval: r.interval,
            count: r.count,
            until: r.until.as_ref().map(crate::format_timestamp),
            week_start: weekday_token(r.week_start).to_string(),
            by_set_pos: r.by_set_pos.to_vec(),
            by_month: r.by_month.to_vec(),
            by_month_day: r.by_month_day.to_vec(),
            by_year_day: r.by_year_day.to_vec(),
            by_week_no: r.by_week.to_vec(),
            by_weekday: r
                .by_week_day
                .iter()
                .map(|&bwd| match bwd {
                    ByWeekday::Every(wd) => {
                        WeekdayEntry::Every(weekday_token(wd).to_string())
                    }
                    ByWeekday::Nth { nth, weekday } => WeekdayEntry::Nth(
                        nth,
                        weekday_token(weekday).to_string(),
                    ),
                })
                .collect(),
            by_hour: r.by_hour.to_vec(),
            by_minute: r.by_minute.to_vec(),
            by_second: r.by_second.to_vec(),
        }
    }
}

impl TryFrom<&Properties> for Rule {
    type Error = Error;

    fn try_from(p: &Properties) -> Result<Rule, Error> {
        let freq: Frequency = p.freq.parse()?;
        let mut builder = Rule::builder(freq);
        builder.interval(p.interval);
        if let Some(count) = p.count {
            builder.count(count);
        }
        if let Some(ref until) = p.until {
            builder.until(crate::validate::instant(until)?);
        }
        let week_start =
            parse_weekday(&p.week_start).ok_or_else(|| {
                ParseError::InvalidValue {
                    name: "WKST",
                    value: p.week_start.clone(),
                }
            })?;
        builder.week_start(week_start);
        let by_weekday = p
            .by_weekday
            .iter()
            .map(|entry| {
                let (nth, code) = match entry {
                    WeekdayEntry::Every(code) => (None, code),
                    WeekdayEntry::Nth(nth, code) => (Some(*nth), code),
                };
                let weekday = parse_weekday(code).ok_or_else(|| {
                    ParseError::InvalidValue {
                        name: "BYDAY",
                        value: code.clone(),
                    }
                })?;
                Ok(match nth {
                    None => ByWeekday::Every(weekday),
                    Some(nth) => ByWeekday::Nth { nth, weekday },
                })
            })
            .collect::<Result<Vec<ByWeekday>, Error>>()?;
        builder
            .by_month(p.by_month.iter().copied())
            .by_week(p.by_week_no.iter().copied())
            .by_year_day(p.by_year_day.iter().copied())
            .by_month_day(p.by_month_day.iter().copied())
            .by_week_day(by_weekday)
            .by_hour(p.by_hour.iter().copied())
            .by_minute(p.by_minute.iter().copied())
            .by_second(p.by_second.iter().copied())
            .by_set_pos(p.by_set_pos.iter().copied());
        builder.build()
    }
}
