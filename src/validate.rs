use jiff::{Timestamp, Zoned, civil::Date, tz::TimeZone};

use crate::{
    error::{CalendarError, DateTimeParseError, Error, ValidationError},
    rule::{ByWeekday, Frequency, RuleBuilder},
};

/// Checks every field of a rule-in-progress against its RFC 5545
/// constraints: numeric ranges first, then the shape rules that tie filters
/// to frequencies.
pub(crate) fn check_builder(
    builder: &RuleBuilder,
) -> Result<(), ValidationError> {
    if builder.interval < 1 {
        return Err(ValidationError::Interval {
            value: i64::from(builder.interval),
        });
    }
    check_range("BYMONTH", &builder.by_month, 1, 12)?;
    check_signed("BYWEEKNO", &builder.by_week, 53)?;
    check_signed("BYYEARDAY", &builder.by_year_day, 366)?;
    check_signed("BYMONTHDAY", &builder.by_month_day, 31)?;
    check_weekdays(builder)?;
    check_range("BYHOUR", &builder.by_hour, 0, 23)?;
    check_range("BYMINUTE", &builder.by_minute, 0, 59)?;
    // RFC 5545 allows BYSECOND=60 for leap seconds. The datetime stack only
    // clamps leap seconds during parsing, and clamping makes no sense here,
    // so 60 is rejected. python-dateutil rejects it too.
    check_range("BYSECOND", &builder.by_second, 0, 59)?;
    check_signed("BYSETPOS", &builder.by_set_pos, 366)?;

    if !builder.by_week.is_empty()
        && !matches!(builder.freq, Frequency::Yearly)
    {
        return Err(ValidationError::FrequencyForbids {
            field: "BYWEEKNO",
            freq: builder.freq.as_token(),
        });
    }
    if !builder.by_year_day.is_empty()
        && matches!(
            builder.freq,
            Frequency::Monthly | Frequency::Weekly | Frequency::Daily
        )
    {
        return Err(ValidationError::FrequencyForbids {
            field: "BYYEARDAY",
            freq: builder.freq.as_token(),
        });
    }
    if !builder.by_month_day.is_empty()
        && matches!(builder.freq, Frequency::Weekly)
    {
        return Err(ValidationError::FrequencyForbids {
            field: "BYMONTHDAY",
            freq: builder.freq.as_token(),
        });
    }

    // BYSETPOS selects from a period's candidate set, so it needs some
    // other rule to build that set.
    if !builder.by_set_pos.is_empty() {
        let alone = builder.by_month.is_empty()
            && builder.by_week.is_empty()
            && builder.by_year_day.is_empty()
            && builder.by_month_day.is_empty()
            && builder.by_week_day.is_empty()
            && builder.by_hour.is_empty()
            && builder.by_minute.is_empty()
            && builder.by_second.is_empty();
        if alone {
            return Err(ValidationError::BareSetPosition);
        }
    }
    Ok(())
}

fn check_range<T: Into<i64> + Copy>(
    field: &'static str,
    values: &[T],
    min: i64,
    max: i64,
) -> Result<(), ValidationError> {
    for &value in values {
        let value = value.into();
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field,
                value,
                min,
                max,
            });
        }
    }
    Ok(())
}

/// Checks a field whose values are `1..=magnitude` or `-magnitude..=-1`.
/// Zero is never valid.
fn check_signed<T: Into<i64> + Copy>(
    field: &'static str,
    values: &[T],
    magnitude: i64,
) -> Result<(), ValidationError> {
    for &value in values {
        let value = value.into();
        if value == 0 || value < -magnitude || value > magnitude {
            return Err(ValidationError::OutOfRange {
                field,
                value,
                min: -magnitude,
                max: magnitude,
            });
        }
    }
    Ok(())
}

fn check_weekdays(builder: &RuleBuilder) -> Result<(), ValidationError> {
    for &entry in builder.by_week_day.iter() {
        let nth = match entry {
            ByWeekday::Every(_) => continue,
            ByWeekday::Nth { nth, .. } => nth,
        };
        // Ordinal weekdays are only defined for YEARLY and MONTHLY rules,
        // and at YEARLY they can't be mixed with week numbers.
        if !matches!(builder.freq, Frequency::Yearly | Frequency::Monthly) {
            return Err(ValidationError::OrdinalWeekdayFrequency {
                token: entry.to_string(),
            });
        }
        if matches!(builder.freq, Frequency::Yearly)
            && !builder.by_week.is_empty()
        {
            return Err(ValidationError::OrdinalWeekdayWithWeekNumbers {
                token: entry.to_string(),
            });
        }
        // The ordinal counts within a year when the frequency is yearly and
        // no BYMONTH narrows the period to a month; otherwise it counts
        // within a month.
        let magnitude = if matches!(builder.freq, Frequency::Yearly)
            && builder.by_month.is_empty()
        {
            53
        } else {
            5
        };
        if nth == 0 || i64::from(nth).abs() > magnitude {
            return Err(ValidationError::OutOfRange {
                field: "BYDAY",
                value: i64::from(nth),
                min: -magnitude,
                max: magnitude,
            });
        }
    }
    Ok(())
}

/// Parses an RFC 3339 timestamp into a zoned instant.
///
/// On failure the error distinguishes a string that is date-shaped but
/// names an impossible day (a [`CalendarError`]) from one that isn't a
/// datetime at all (a [`DateTimeParseError`]).
pub(crate) fn instant(input: &str) -> Result<Zoned, Error> {
    match input.parse::<Timestamp>() {
        Ok(ts) => Ok(ts.to_zoned(TimeZone::UTC)),
        Err(_) => Err(classify_instant(input)),
    }
}

/// Decides which error to report for a timestamp string that failed to
/// parse.
pub(crate) fn classify_instant(input: &str) -> Error {
    if let Some((year, month, day)) = leading_date(input) {
        if let Some(err) = impossible_date(year, month, day) {
            return err.into();
        }
    }
    DateTimeParseError { input: input.to_string() }.into()
}

/// Returns the calendar error for a (year, month, day) triple whose day
/// does not exist in that month, or `None` when the date is real (or the
/// month itself is out of range, which is not a *calendar* problem).
pub(crate) fn impossible_date(
    year: i16,
    month: i8,
    day: i8,
) -> Option<CalendarError> {
    let first = Date::new(year, month, 1).ok()?;
    let days_in_month = first.days_in_month();
    if (1..=days_in_month).contains(&day) {
        return None;
    }
    Some(CalendarError { year, month, day, days_in_month })
}

/// Extracts a leading `YYYY-MM-DD` or `YYYYMMDD` date from a timestamp
/// string, if it has one.
fn leading_date(input: &str) -> Option<(i16, i8, i8)> {
    fn number<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
        if !digits.iter().all(|b| b.is_ascii_digit()) {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    }

    let bytes = input.as_bytes();
    let (y, m, d) = if bytes.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
    {
        (&bytes[..4], &bytes[5..7], &bytes[8..10])
    } else if bytes.len() >= 8 {
        (&bytes[..4], &bytes[4..6], &bytes[6..8])
    } else {
        return None;
    };
    Some((number(y)?, number(m)?, number(d)?))
}

#[cfg(test)]
mod tests {
    use crate::rule::Rule;

    use super::*;

    #[test]
    fn out_of_range_carries_field_and_bounds() {
        let err = Rule::builder(Frequency::Monthly)
            .by_month_day([35])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::OutOfRange {
                field: "BYMONTHDAY",
                value: 35,
                min: -31,
                max: 31,
            }),
        );

        let err =
            Rule::builder(Frequency::Daily).by_hour([24]).build().unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::OutOfRange {
                field: "BYHOUR",
                value: 24,
                min: 0,
                max: 23,
            }),
        );

        // Zero is outside every signed range.
        let err = Rule::builder(Frequency::Yearly)
            .by_week([0])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::OutOfRange {
                field: "BYWEEKNO",
                value: 0,
                min: -53,
                max: 53,
            }),
        );
    }

    #[test]
    fn interval_must_be_positive() {
        let err =
            Rule::builder(Frequency::Daily).interval(0).build().unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::Interval { value: 0 }),
        );
    }

    #[test]
    fn by_week_only_at_yearly() {
        let err = Rule::builder(Frequency::Monthly)
            .by_week([20])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::FrequencyForbids {
                field: "BYWEEKNO",
                freq: "MONTHLY",
            }),
        );
    }

    #[test]
    fn ordinal_weekdays_only_at_yearly_or_monthly() {
        use jiff::civil::Weekday;

        let err = Rule::builder(Frequency::Weekly)
            .by_week_day([ByWeekday::Nth { nth: 2, weekday: Weekday::Monday }])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::OrdinalWeekdayFrequency {
                token: "2MO".to_string(),
            }),
        );

        let err = Rule::builder(Frequency::Monthly)
            .by_week_day([ByWeekday::Nth { nth: 6, weekday: Weekday::Monday }])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::OutOfRange {
                field: "BYDAY",
                value: 6,
                min: -5,
                max: 5,
            }),
        );

        // At yearly with no BYMONTH, the ordinal ranges over weeks.
        assert!(
            Rule::builder(Frequency::Yearly)
                .by_week_day([ByWeekday::Nth {
                    nth: 20,
                    weekday: Weekday::Monday,
                }])
                .build()
                .is_ok()
        );
    }

    #[test]
    fn set_position_needs_company() {
        let err = Rule::builder(Frequency::Monthly)
            .by_set_pos([3])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::BareSetPosition),
        );
    }

    #[test]
    fn validation_is_idempotent() {
        let rule = Rule::builder(Frequency::Monthly)
            .by_month_day([15, 30])
            .build()
            .unwrap();
        assert_eq!(rule.validate(), rule.validate());
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn instant_classification() {
        assert!(instant("2023-04-01T00:00:00Z").is_ok());
        assert!(instant("2023-04-01T00:00:00.000+01:00").is_ok());

        let err = instant("2023-02-32T00:00:00Z").unwrap_err();
        assert_eq!(
            err,
            Error::Calendar(CalendarError {
                year: 2023,
                month: 2,
                day: 32,
                days_in_month: 28,
            }),
        );

        let err = instant("when the saints go marching in").unwrap_err();
        assert_eq!(
            err,
            Error::DateTimeParse(DateTimeParseError {
                input: "when the saints go marching in".to_string(),
            }),
        );

        // A month that doesn't exist isn't a calendar error; there's no
        // month to blame it on.
        let err = instant("2023-13-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, Error::DateTimeParse(_)));
    }
}
