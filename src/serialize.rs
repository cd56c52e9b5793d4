use std::fmt::{self, Write};

use jiff::{Zoned, civil::Weekday, tz::TimeZone};

use crate::{
    error::Error,
    rule::{Properties, Rule, weekday_token},
};

/// Serializes a diagnostic view back into canonical RRULE text.
///
/// This is the fallible path: a hand-rolled [`Properties`] can carry an
/// unrecognized frequency string or out-of-range fields, all of which are
/// rejected while rebuilding the [`Rule`]. A rule that already exists
/// serializes infallibly through its `Display` impl.
pub fn serialize_rule(props: &Properties) -> Result<String, Error> {
    let rule = Rule::try_from(props)?;
    Ok(rule.to_string())
}

impl fmt::Display for Rule {
    /// Writes the canonical text: `FREQ` first, then the present,
    /// non-default parameters in a fixed order, lists comma separated in
    /// sorted order.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let r = self.inner();
        write!(f, "FREQ={}", r.freq.as_token())?;
        if r.interval != 1 {
            write!(f, ";INTERVAL={}", r.interval)?;
        }
        if let Some(count) = r.count {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(ref until) = r.until {
            write!(f, ";UNTIL={}", basic_utc(until))?;
        }
        if r.week_start != Weekday::Monday {
            write!(f, ";WKST={}", weekday_token(r.week_start))?;
        }
        list(f, "BYMONTH", &r.by_month)?;
        list(f, "BYWEEKNO", &r.by_week)?;
        list(f, "BYYEARDAY", &r.by_year_day)?;
        list(f, "BYMONTHDAY", &r.by_month_day)?;
        list(f, "BYDAY", &r.by_week_day)?;
        list(f, "BYHOUR", &r.by_hour)?;
        list(f, "BYMINUTE", &r.by_minute)?;
        list(f, "BYSECOND", &r.by_second)?;
        list(f, "BYSETPOS", &r.by_set_pos)?;
        Ok(())
    }
}

fn list<T: fmt::Display>(
    f: &mut fmt::Formatter,
    name: &str,
    values: &[T],
) -> fmt::Result {
    if values.is_empty() {
        return Ok(());
    }
    write!(f, ";{name}=")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_char(',')?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

/// Formats an UNTIL bound in the basic UTC form, `19971224T000000Z`.
fn basic_utc(until: &Zoned) -> String {
    let dt = until.with_time_zone(TimeZone::UTC).datetime();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
    )
}
