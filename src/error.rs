use thiserror::Error;

/// Any error produced by this crate.
///
/// Every operation returns a tagged result; nothing panics across the API
/// boundary for bad input. The payloads are structured data with public
/// fields so that callers can re-render them however they like. The
/// `Display` impls give a default rendering.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// The rule or DTSTART text itself could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The rule parsed, but a field value is outside its RFC 5545 range
    /// or the combination of fields is not allowed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A syntactically plausible datetime names a day that does not exist
    /// in its month.
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    /// A datetime string that isn't a datetime at all.
    #[error(transparent)]
    DateTimeParse(#[from] DateTimeParseError),
}

/// An error found while parsing RRULE or DTSTART text.
///
/// Each variant carries the raw fragment that provoked it.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ParseError {
    /// A `KEY=VALUE` parameter whose key isn't part of the grammar.
    #[error("unrecognized parameter `{name}`")]
    UnknownParameter { name: String },
    /// A parameter without a `=` separating key and value.
    #[error("malformed parameter `{param}` (expected KEY=VALUE)")]
    MalformedParameter { param: String },
    /// A FREQ token that isn't one of the seven frequencies.
    #[error("unrecognized frequency `{token}`")]
    UnknownFrequency { token: String },
    /// A value (or one entry of a comma separated list) that doesn't parse
    /// for its parameter.
    #[error("invalid value `{value}` for {name}")]
    InvalidValue { name: &'static str, value: String },
    /// A TZID naming a zone the tz database doesn't know.
    #[error("unknown time zone `{tzid}`")]
    UnknownTimeZone { tzid: String },
    /// An RRULE line with no FREQ parameter.
    #[error("recurrence rule is missing its FREQ parameter")]
    MissingFrequency,
    /// Rule text with no RRULE line (or bare parameter string) at all.
    #[error("no recurrence rule found in input")]
    MissingRule,
    /// Rule text with no DTSTART line, for an operation that needs one.
    #[error("no DTSTART found in input")]
    MissingStart,
}

/// A rule field whose value breaks an RFC 5545 constraint.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ValidationError {
    /// A by-filter value outside its RFC defined numeric range.
    ///
    /// For fields that admit negative values (BYMONTHDAY and friends),
    /// `min..=max` is the full signed envelope and zero is never valid;
    /// the rendering spells that out.
    #[error(
        "invalid {field} value `{value}` (values must be in {})",
        range_label(.min, .max)
    )]
    OutOfRange { field: &'static str, value: i64, min: i64, max: i64 },
    /// An interval below one.
    #[error("interval value `{value}` is invalid (interval must be at least 1)")]
    Interval { value: i64 },
    /// An interval too large to express as a calendar span at this
    /// frequency.
    #[error("interval `{value}` is too large for {freq} frequency")]
    IntervalOverflow { value: i64, freq: &'static str },
    /// A by-filter that RFC 5545 forbids at the rule's frequency.
    #[error("{field} cannot be used at {freq} frequency")]
    FrequencyForbids { field: &'static str, freq: &'static str },
    /// An ordinal weekday (`2TU`) at a frequency other than yearly or
    /// monthly.
    #[error("ordinal weekday `{token}` is only allowed at yearly or monthly frequency")]
    OrdinalWeekdayFrequency { token: String },
    /// An ordinal weekday combined with BYWEEKNO.
    #[error("ordinal weekday `{token}` is not allowed when BYWEEKNO is used")]
    OrdinalWeekdayWithWeekNumbers { token: String },
    /// BYSETPOS with no other by-filter to select from.
    #[error("BYSETPOS requires at least one other BY parameter")]
    BareSetPosition,
}

/// A datetime that is shaped like a datetime but names a day its month
/// doesn't have, like February 32.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error(
    "invalid date: {} {year} has {days_in_month} days, but day {day} was given",
    month_name(.month)
)]
pub struct CalendarError {
    pub year: i16,
    pub month: i8,
    pub day: i8,
    pub days_in_month: i8,
}

/// A string that should have been a datetime and wasn't.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid datetime: `{input}`")]
pub struct DateTimeParseError {
    pub input: String,
}

fn range_label(&min: &i64, &max: &i64) -> String {
    if min < 0 {
        format!("range 1..={max} or {min}..=-1")
    } else {
        format!("range {min}..={max}")
    }
}

fn month_name(month: &i8) -> &'static str {
    match *month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "month",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_rendering() {
        let err = ValidationError::OutOfRange {
            field: "BYMONTHDAY",
            value: 35,
            min: -31,
            max: 31,
        };
        insta::assert_snapshot!(
            err,
            @"invalid BYMONTHDAY value `35` (values must be in range 1..=31 or -31..=-1)",
        );

        let err = ValidationError::OutOfRange {
            field: "BYHOUR",
            value: 24,
            min: 0,
            max: 23,
        };
        insta::assert_snapshot!(
            err,
            @"invalid BYHOUR value `24` (values must be in range 0..=23)",
        );
    }

    #[test]
    fn calendar_rendering() {
        let err =
            CalendarError { year: 2023, month: 2, day: 32, days_in_month: 28 };
        insta::assert_snapshot!(
            err,
            @"invalid date: February 2023 has 28 days, but day 32 was given",
        );
    }
}
