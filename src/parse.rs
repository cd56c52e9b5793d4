use std::str::FromStr;

use jiff::{Zoned, civil::DateTime, tz::TimeZone};

use crate::{
    error::{DateTimeParseError, Error, ParseError},
    rule::{ByWeekday, Frequency, Rule, parse_weekday},
};

/// Parses recurrence rule text into a rule and, when present, its anchor.
///
/// The text holds up to two logical lines in either order: a
/// `DTSTART[;TZID=<zone>]:<datetime>` line and an RRULE line. The RRULE
/// line may carry its `RRULE:` prefix or be a bare `KEY=VALUE;...`
/// parameter string. Blank lines are ignored.
pub(crate) fn components(
    text: &str,
) -> Result<(Rule, Option<Zoned>), Error> {
    let mut anchor = None;
    let mut rule = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = strip_ignore_case(line, "DTSTART") {
            anchor = Some(dtstart(rest)?);
        } else {
            rule = Some(rule_line(line)?);
        }
    }
    let Some(rule) = rule else {
        return Err(ParseError::MissingRule.into());
    };
    Ok((rule, anchor))
}

/// Like [`components`], but the anchor is required.
pub(crate) fn rule_set(text: &str) -> Result<(Rule, Zoned), Error> {
    let (rule, anchor) = components(text)?;
    let Some(anchor) = anchor else {
        return Err(ParseError::MissingStart.into());
    };
    Ok((rule, anchor))
}

/// Parses one RRULE line into a rule. The `RRULE:` prefix is optional.
pub(crate) fn rule_line(line: &str) -> Result<Rule, Error> {
    let line = strip_ignore_case(line, "RRULE:").unwrap_or(line).trim();
    if line.is_empty() {
        return Err(ParseError::MissingRule.into());
    }

    let mut freq = None;
    let mut interval = None;
    let mut count = None;
    let mut until = None;
    let mut week_start = None;
    let mut by_month = vec![];
    let mut by_week = vec![];
    let mut by_year_day = vec![];
    let mut by_month_day = vec![];
    let mut by_week_day = vec![];
    let mut by_hour = vec![];
    let mut by_minute = vec![];
    let mut by_second = vec![];
    let mut by_set_pos = vec![];
    for param in line.split(';') {
        let Some((key, value)) = param.split_once('=') else {
            return Err(ParseError::MalformedParameter {
                param: param.to_string(),
            }
            .into());
        };
        match &*key.trim().to_ascii_uppercase() {
            "FREQ" => freq = Some(value.parse::<Frequency>()?),
            "INTERVAL" => interval = Some(number("INTERVAL", value)?),
            "COUNT" => count = Some(number("COUNT", value)?),
            "UNTIL" => until = Some(until_value(value)?),
            "WKST" => {
                let weekday = parse_weekday(value.trim()).ok_or_else(|| {
                    ParseError::InvalidValue {
                        name: "WKST",
                        value: value.to_string(),
                    }
                })?;
                week_start = Some(weekday);
            }
            "BYMONTH" => by_month = numbers("BYMONTH", value)?,
            "BYWEEKNO" => by_week = numbers("BYWEEKNO", value)?,
            "BYYEARDAY" => by_year_day = numbers("BYYEARDAY", value)?,
            "BYMONTHDAY" => by_month_day = numbers("BYMONTHDAY", value)?,
            "BYDAY" => {
                by_week_day = value
                    .split(',')
                    .map(|token| token.trim().parse::<ByWeekday>())
                    .collect::<Result<Vec<ByWeekday>, ParseError>>()?;
            }
            "BYHOUR" => by_hour = numbers("BYHOUR", value)?,
            "BYMINUTE" => by_minute = numbers("BYMINUTE", value)?,
            "BYSECOND" => by_second = numbers("BYSECOND", value)?,
            "BYSETPOS" => by_set_pos = numbers("BYSETPOS", value)?,
            _ => {
                return Err(ParseError::UnknownParameter {
                    name: key.to_string(),
                }
                .into());
            }
        }
    }
    let Some(freq) = freq else {
        return Err(ParseError::MissingFrequency.into());
    };

    let mut builder = Rule::builder(freq);
    if let Some(interval) = interval {
        builder.interval(interval);
    }
    if let Some(count) = count {
        builder.count(count);
    }
    if let Some(until) = until {
        builder.until(until);
    }
    if let Some(week_start) = week_start {
        builder.week_start(week_start);
    }
    builder
        .by_month(by_month)
        .by_week(by_week)
        .by_year_day(by_year_day)
        .by_month_day(by_month_day)
        .by_week_day(by_week_day)
        .by_hour(by_hour)
        .by_minute(by_minute)
        .by_second(by_second)
        .by_set_pos(by_set_pos);
    builder.build()
}

/// Parses the remainder of a DTSTART line (everything after the property
/// name): `[;TZID=<zone>]:<datetime>`.
///
/// A trailing `Z` on the datetime marks it as UTC; combined with a TZID,
/// the UTC instant is then viewed in that zone. A datetime with neither
/// TZID nor `Z` is taken as UTC.
fn dtstart(rest: &str) -> Result<Zoned, Error> {
    let Some((params, value)) = rest.split_once(':') else {
        return Err(ParseError::InvalidValue {
            name: "DTSTART",
            value: rest.to_string(),
        }
        .into());
    };
    let mut tzid = None;
    for param in params.split(';').filter(|p| !p.is_empty()) {
        let Some((key, value)) = param.split_once('=') else {
            return Err(ParseError::MalformedParameter {
                param: param.to_string(),
            }
            .into());
        };
        if key.trim().eq_ignore_ascii_case("TZID") {
            tzid = Some(value.trim());
        } else {
            return Err(ParseError::UnknownParameter {
                name: key.to_string(),
            }
            .into());
        }
    }

    let value = value.trim();
    let (dt, utc) = basic_datetime(value)?;
    let tz = match tzid {
        None => TimeZone::UTC,
        Some(name) => TimeZone::get(name).map_err(|_| {
            ParseError::UnknownTimeZone { tzid: name.to_string() }
        })?,
    };
    let zoned = if utc {
        // An unambiguous instant; re-zone it for display and civil
        // arithmetic.
        let in_utc = TimeZone::UTC.to_zoned(dt).map_err(|_| {
            DateTimeParseError { input: value.to_string() }
        })?;
        in_utc.timestamp().to_zoned(tz)
    } else {
        // A local civil time. Gaps and folds resolve the way the datetime
        // stack prefers ("compatible": earlier of a fold, later of a gap).
        tz.to_zoned(dt).map_err(|_| DateTimeParseError {
            input: value.to_string(),
        })?
    };
    Ok(zoned)
}

/// Parses the iCalendar basic datetime format: `YYYYMMDDTHHMMSS[Z]`, or a
/// bare `YYYYMMDD[Z]` date meaning midnight. Returns the civil datetime and
/// whether it was marked UTC.
fn basic_datetime(input: &str) -> Result<(DateTime, bool), Error> {
    fn number<T: FromStr>(digits: &str) -> Option<T> {
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
    let bad = || DateTimeParseError { input: input.to_string() };

    let (s, utc) = match input.strip_suffix(['Z', 'z']) {
        Some(rest) => (rest, true),
        None => (input, false),
    };
    let (date_part, time_part) = match s.split_once(['T', 't']) {
        Some((date, time)) => (date, Some(time)),
        None => (s, None),
    };
    if date_part.len() != 8 || !date_part.is_ascii() {
        return Err(bad().into());
    }
    let year: i16 = number(&date_part[..4]).ok_or_else(bad)?;
    let month: i8 = number(&date_part[4..6]).ok_or_else(bad)?;
    let day: i8 = number(&date_part[6..8]).ok_or_else(bad)?;
    if !(1..=12).contains(&month) {
        return Err(bad().into());
    }
    if let Some(err) = crate::validate::impossible_date(year, month, day) {
        return Err(err.into());
    }
    let date = jiff::civil::Date::new(year, month, day)
        .map_err(|_| bad())?;

    let (hour, minute, second) = match time_part {
        None => (0, 0, 0),
        Some(time) => {
            if time.len() != 6 || !time.is_ascii() {
                return Err(bad().into());
            }
            let hour: i8 = number(&time[..2]).ok_or_else(bad)?;
            let minute: i8 = number(&time[2..4]).ok_or_else(bad)?;
            let second: i8 = number(&time[4..6]).ok_or_else(bad)?;
            if hour > 23 || minute > 59 || second > 59 {
                return Err(bad().into());
            }
            (hour, minute, second)
        }
    };
    Ok((date.at(hour, minute, second, 0), utc))
}

/// Parses an UNTIL value. Both basic forms are accepted and interpreted in
/// UTC, with or without the `Z`.
fn until_value(value: &str) -> Result<Zoned, Error> {
    let value = value.trim();
    let (dt, _) = basic_datetime(value)?;
    TimeZone::UTC
        .to_zoned(dt)
        .map_err(|_| DateTimeParseError { input: value.to_string() }.into())
}

fn number<T: FromStr>(
    name: &'static str,
    value: &str,
) -> Result<T, ParseError> {
    value.trim().parse().map_err(|_| ParseError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn numbers<T: FromStr>(
    name: &'static str,
    value: &str,
) -> Result<Vec<T>, ParseError> {
    value.split(',').map(|entry| number(name, entry)).collect()
}

/// Strips a case-insensitive ASCII prefix.
fn strip_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}
