use jiff::{
    ToSpan,
    civil::{Date, Weekday},
};

/// A date on a week-numbering calendar whose weeks start on an arbitrary
/// weekday.
///
/// RFC 5545 numbers weeks the way ISO 8601 does, except that WKST moves the
/// first day of the week: week one of a year is the first week with at least
/// four days in that year. `jiff::civil::ISOWeekDate` hard-codes Monday, so
/// BYWEEKNO with any other WKST needs this.
///
/// Everything here returns `Option` and treats dates that fall outside the
/// supported civil range as absent. That fits how the occurrence generator
/// consumes week dates: a week that can't be materialized contributes no
/// candidates.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WeekDate {
    start: Weekday,
    year: i16,
    week: i8,
    weekday: Weekday,
}

impl WeekDate {
    /// Builds a week date from its parts.
    ///
    /// `week` must be `1..=53`, and `53` only exists in "long" years.
    pub(crate) fn new(
        start: Weekday,
        year: i16,
        week: i8,
        weekday: Weekday,
    ) -> Option<WeekDate> {
        if !(1..=53).contains(&week) {
            return None;
        }
        if week == 53 && !is_long_year(start, year) {
            return None;
        }
        let wd = WeekDate { start, year, week, weekday };
        // Probe the conversion so week dates at the edges of the civil
        // range can't be constructed and then fail later.
        wd.to_date()?;
        Some(wd)
    }

    /// Computes the week date of the given Gregorian date.
    pub(crate) fn from_date(start: Weekday, date: Date) -> Option<WeekDate> {
        let mut first = first_week_start(start, date.year())?;
        if date < first {
            first = first_week_start(start, date.year() - 1)?;
        } else if let Some(next) = first_week_start(start, date.year() + 1) {
            // `first_week_start` of year+1 fails when `date` is in the last
            // supported year, but then `date` can't be in that week anyway.
            if date >= next {
                first = next;
            }
        }

        debug_assert!(date >= first);
        let days = first.until(date).ok()?.get_days();
        // Weeks are one-indexed.
        let week = i8::try_from(days / 7).ok()? + 1;
        // Four days into the first week, the Gregorian year always agrees
        // with the week-date year.
        let year = first.checked_add(4.days()).ok()?.year();
        Some(WeekDate { start, year, week, weekday: date.weekday() })
    }

    /// Converts this week date back to a Gregorian date.
    pub(crate) fn to_date(self) -> Option<Date> {
        let first = first_week_start(self.start, self.year)?;
        let days = i32::from(self.week - 1) * 7
            + i32::from(self.weekday.since(self.start));
        first.checked_add(days.days()).ok()
    }

    /// The number of weeks in this week date's year: 52, or 53 for long
    /// years.
    pub(crate) fn weeks_in_year(self) -> i8 {
        if is_long_year(self.start, self.year) { 53 } else { 52 }
    }
}

/// Returns the first date of the week containing `date`, for weeks starting
/// on `start`.
pub(crate) fn first_of_week(start: Weekday, date: Date) -> Option<Date> {
    if date.weekday() == start {
        Some(date)
    } else {
        date.nth_weekday(-1, start).ok()
    }
}

/// Returns the last date of the week containing `date`, for weeks starting
/// on `start`.
pub(crate) fn last_of_week(start: Weekday, date: Date) -> Option<Date> {
    let last = start.wrapping_sub(1);
    if date.weekday() == last {
        Some(date)
    } else {
        date.nth_weekday(1, last).ok()
    }
}

/// True when the given week-numbering year has 53 weeks.
fn is_long_year(start: Weekday, year: i16) -> bool {
    let Ok(last) = Date::new(year, 12, 31) else { return false };
    let weekday = last.weekday();
    weekday == start.wrapping_add(3)
        || (last.in_leap_year() && weekday == start.wrapping_add(4))
}

/// The first date of week one of `year`, which is guaranteed to fall on
/// `start`.
///
/// RFC 5545: "Week number one of the calendar year is the first week that
/// contains at least four (4) days in that calendar year." So January 4 is
/// always inside week one; step back to the week's start from there.
fn first_week_start(start: Weekday, year: i16) -> Option<Date> {
    let in_first_week = Date::new(year, 1, 4).ok()?;
    let behind = in_first_week.weekday().since(start);
    in_first_week.checked_sub(behind.days()).ok()
}
