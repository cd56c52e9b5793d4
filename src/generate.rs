use jiff::{
    Span, Timestamp, ToSpan, Unit, Zoned,
    civil::{DateTime, DateTimeDifference, Weekday},
    tz::AmbiguousOffset,
};

use crate::{
    rule::{ByWeekday, Frequency, Rule, RuleInner},
    weekdate::{self, WeekDate},
};

/// How many consecutive candidate-free periods an unbounded rule may
/// produce before iteration gives up.
///
/// Some filter combinations never intersect their period again, e.g.
/// `FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=30`. When neither COUNT nor UNTIL
/// bounds the rule, this horizon is what makes such rules terminate.
/// Legitimately sparse rules stay far under it: a leap-day yearly rule goes
/// at most seven periods without a candidate.
const DRY_PERIOD_LIMIT: u32 = 500;

impl Rule {
    /// Returns an iterator over this rule's occurrences, expanded from the
    /// given anchor.
    ///
    /// The anchor fixes the time zone of every occurrence, the civil
    /// calendar that interval arithmetic runs on, and the default for every
    /// component the rule's filters leave unset (no BYHOUR keeps the
    /// anchor's hour, and so on). Occurrences before the anchor are never
    /// produced.
    ///
    /// The iterator is lazy and may be effectively infinite; callers bound
    /// it with `take`, the rule's COUNT/UNTIL, or one of the windowed
    /// queries.
    pub fn occurrences(&self, anchor: &Zoned) -> Occurrences<'_> {
        Occurrences {
            rule: self,
            start: anchor.clone(),
            civil_start: anchor.datetime(),
            set: CandidateSet::default(),
            cur: Some((0, anchor.datetime())),
            emitted: 0,
            dry: 0,
        }
    }

    /// Returns every occurrence within `start..=end` (when `inclusive`) or
    /// `start..end` exclusive of both endpoints (when not), in ascending
    /// order.
    ///
    /// The inclusive flag governs both boundaries symmetrically. Unless the
    /// rule carries COUNT (whose occurrence numbering forces an
    /// anchor-origin scan), generation begins near `start` rather than at
    /// the anchor.
    pub fn between(
        &self,
        anchor: &Zoned,
        start: Timestamp,
        end: Timestamp,
        inclusive: bool,
    ) -> Vec<Zoned> {
        let mut found = vec![];
        let mut iter = self.occurrences(anchor);
        iter.seek(start);
        for zdt in iter {
            let ts = zdt.timestamp();
            if ts < start || (!inclusive && ts == start) {
                continue;
            }
            if ts > end || (!inclusive && ts == end) {
                break;
            }
            found.push(zdt);
        }
        found
    }

    /// Returns the latest occurrence before `cutoff`, or at it when
    /// `inclusive`. `None` when no occurrence precedes the cutoff.
    pub fn just_before(
        &self,
        anchor: &Zoned,
        cutoff: Timestamp,
        inclusive: bool,
    ) -> Option<Zoned> {
        // Start scanning a couple of periods before the cutoff. If that
        // window turns out to hold no occurrence at all, widen the lookback
        // geometrically until one is found or the scan has started at the
        // anchor itself.
        let mut backoff = 2;
        loop {
            let mut iter = self.occurrences(anchor);
            let seeked = iter.seek_within(cutoff, backoff);
            let mut latest = None;
            for zdt in &mut iter {
                let ts = zdt.timestamp();
                if ts > cutoff || (!inclusive && ts == cutoff) {
                    break;
                }
                latest = Some(zdt);
            }
            if latest.is_some() || !seeked {
                return latest;
            }
            backoff = backoff.saturating_mul(8);
        }
    }

    /// Returns the earliest occurrence after `cutoff`, or at it when
    /// `inclusive`. `None` when the rule ends before the cutoff.
    pub fn just_after(
        &self,
        anchor: &Zoned,
        cutoff: Timestamp,
        inclusive: bool,
    ) -> Option<Zoned> {
        let mut iter = self.occurrences(anchor);
        iter.seek(cutoff);
        iter.find(|zdt| {
            let ts = zdt.timestamp();
            ts > cutoff || (inclusive && ts == cutoff)
        })
    }
}

/// A lazy iterator over a rule's occurrences.
///
/// Works period by period: expand the current period's candidate set
/// according to the rule's filters, drain it in ascending order, then step
/// the cursor `interval` periods forward and refill.
#[derive(Clone, Debug)]
pub struct Occurrences<'r> {
    rule: &'r Rule,
    /// The anchor. Provides the time zone and the floor below which
    /// candidates are dropped.
    start: Zoned,
    /// The anchor's civil datetime, the base of all period arithmetic.
    civil_start: DateTime,
    /// Candidates for the period most recently expanded, drained before the
    /// cursor advances.
    set: CandidateSet,
    /// The period cursor: the attempt index and the civil datetime at that
    /// attempt. The datetime for attempt `n` is always computed as
    /// `civil_start + step * n` rather than by repeated addition, so a
    /// clamped month end (2025-03-31 stepping to 2025-04-30) can't infect
    /// every subsequent period.
    ///
    /// `None` once iteration has nothing further to visit.
    cur: Option<(i64, DateTime)>,
    /// How many occurrences have been emitted, for COUNT.
    emitted: u64,
    /// Consecutive periods that contributed no candidate.
    dry: u32,
}

impl<'r> Occurrences<'r> {
    /// Positions the cursor so the next expansion happens shortly before
    /// `target`. See `seek_within`.
    pub(crate) fn seek(&mut self, target: Timestamp) -> bool {
        self.seek_within(target, 2)
    }

    /// Advances the period cursor to `backoff` interval steps before the
    /// period containing `target`, without expanding anything in between.
    ///
    /// Candidates always live within one period of their cursor datetime,
    /// so scanning from the seeked position observes every occurrence at or
    /// after `target`. Returns false without moving when seeking is
    /// unsound or useless: a COUNT rule (occurrence numbering starts at the
    /// anchor), an already-started iterator, or a target at or before the
    /// anchor.
    pub(crate) fn seek_within(
        &mut self,
        target: Timestamp,
        backoff: i64,
    ) -> bool {
        let r = self.rule.inner();
        if r.count.is_some() {
            return false;
        }
        if !matches!(self.cur, Some((0, _))) {
            return false;
        }
        let tz = self.start.time_zone();
        let target_dt = target.to_zoned(tz.clone()).datetime();
        if target_dt <= self.civil_start {
            return false;
        }
        let Some(units) = units_between(r.freq, self.civil_start, target_dt)
        else {
            return false;
        };
        let mut attempt = units / i64::from(r.interval) - backoff;
        while attempt > 0 {
            let landing = r
                .step
                .checked_mul(attempt)
                .ok()
                .and_then(|step| self.civil_start.checked_add(step).ok());
            match landing {
                Some(dt) if !self.clamped_landing(dt) => {
                    self.cur = Some((attempt, dt));
                    return true;
                }
                // A clamped or unrepresentable landing; back up one period
                // and try again.
                _ => attempt -= 1,
            }
        }
        false
    }

    /// Expands the current period into the candidate set.
    fn fill(&mut self) {
        let Some((_, cur)) = self.cur else { return };
        let expansion = Expansion {
            rule: self.rule.inner(),
            cur,
            start: self.civil_start,
        };
        expansion.fill(&mut self.set);
        if !self.rule.inner().by_set_pos.is_empty() {
            self.select_positions();
        }
    }

    /// Applies BYSETPOS to the freshly expanded period.
    ///
    /// Positions are resolved against the whole sorted period set, so the
    /// civil candidates are materialized as zoned datetimes first; negative
    /// positions need the set's final length. Candidates before the anchor
    /// or beyond UNTIL still occupy positions here and are filtered later,
    /// when popped.
    fn select_positions(&mut self) {
        while let Some(zdt) = self.pop_civil() {
            self.set.zoned.push(zdt);
        }
        self.set.zoned.sort();
        self.set.zoned.dedup();
        let positions = &self.rule.inner().by_set_pos;
        let len = self.set.zoned.len();
        let mut at = 0;
        self.set.zoned.retain(|_| {
            let keep = position_selected(positions, at, len);
            at += 1;
            keep
        });
        // Popping happens from the back.
        self.set.zoned.reverse();
    }

    /// Pops the next candidate in ascending order, dropping candidates
    /// before the anchor and stopping at UNTIL.
    fn pop(&mut self) -> Option<Zoned> {
        loop {
            let next = match self.set.zoned.pop() {
                Some(zdt) => zdt,
                None => self.pop_civil()?,
            };
            // The expansion step generates whole periods, so the first
            // period can hold candidates before the anchor. Filtering here,
            // after zoned conversion, is also what lets BYSETPOS count
            // them.
            if next < self.start {
                continue;
            }
            if let Some(ref until) = self.rule.inner().until {
                if &next > until {
                    // Candidates only move forward; nothing after this one
                    // can be emitted either.
                    self.set.clear();
                    return None;
                }
            }
            return Some(next);
        }
    }

    /// Pops the next civil candidate and resolves it in the anchor's time
    /// zone.
    ///
    /// RFC 5545 says a local time that doesn't exist in the zone (a DST
    /// gap) is skipped. For a repeated local time (a fold) it says nothing;
    /// both instants are emitted, earlier first, which errs on the side of
    /// producing too much rather than silently picking one.
    fn pop_civil(&mut self) -> Option<Zoned> {
        let tz = self.start.time_zone();
        loop {
            if let Some(zdt) = self.set.queued.take() {
                return Some(zdt);
            }
            let dt = self.set.civil.pop()?;
            match tz.to_ambiguous_zoned(dt).offset() {
                AmbiguousOffset::Unambiguous { offset } => {
                    let Ok(ts) = offset.to_timestamp(dt) else { continue };
                    return Some(ts.to_zoned(tz.clone()));
                }
                AmbiguousOffset::Gap { .. } => continue,
                AmbiguousOffset::Fold { before, after } => {
                    if let Ok(ts) = after.to_timestamp(dt) {
                        self.set.queued = Some(ts.to_zoned(tz.clone()));
                    }
                    if let Ok(ts) = before.to_timestamp(dt) {
                        return Some(ts.to_zoned(tz.clone()));
                    }
                    // The earlier offset fell out of range; loop around and
                    // emit the queued one.
                }
            }
        }
    }

    /// Steps the cursor to the next period.
    ///
    /// Adding N months or years can clamp the day (2024-02-29 plus one year
    /// is 2025-02-28). RFC 5545 treats the clamped date as nonexistent, so
    /// such landings are skipped, unless a date-selecting filter is present
    /// to pick the date itself.
    fn advance(&self) -> Option<(i64, DateTime)> {
        let (mut attempt, _) = self.cur?;
        let r = self.rule.inner();
        loop {
            attempt = attempt.checked_add(1)?;
            let step = r.step.checked_mul(attempt).ok()?;
            let next = self.civil_start.checked_add(step).ok()?;
            // Not required for correctness (popping filters on UNTIL too),
            // but it bounds the work when periods stop contributing
            // candidates before UNTIL is reached.
            if let Some(ref until) = r.until {
                let probe = self
                    .start
                    .time_zone()
                    .to_ambiguous_zoned(next)
                    .later()
                    .ok()?;
                if &probe > until {
                    return None;
                }
            }
            if self.clamped_landing(next) {
                continue;
            }
            return Some((attempt, next));
        }
    }

    /// True when the cursor landing had its day clamped and no filter would
    /// override the date anyway.
    fn clamped_landing(&self, dt: DateTime) -> bool {
        let r = self.rule.inner();
        if dt.day() == self.civil_start.day() {
            return false;
        }
        match r.freq {
            Frequency::Yearly => {
                r.by_month.is_empty()
                    && r.by_week.is_empty()
                    && r.by_year_day.is_empty()
                    && r.by_month_day.is_empty()
                    && r.by_week_day.is_empty()
            }
            Frequency::Monthly => {
                r.by_week_day.is_empty() && r.by_month_day.is_empty()
            }
            _ => false,
        }
    }

    fn count_reached(&self) -> bool {
        self.rule
            .inner()
            .count
            .is_some_and(|count| self.emitted >= u64::from(count))
    }
}

impl<'r> Iterator for Occurrences<'r> {
    type Item = Zoned;

    fn next(&mut self) -> Option<Zoned> {
        if self.count_reached() {
            return None;
        }
        while self.cur.is_some() || !self.set.is_empty() {
            if let Some(zdt) = self.pop() {
                self.emitted += 1;
                return Some(zdt);
            }
            if self.cur.is_none() {
                break;
            }
            self.fill();
            if self.set.is_empty() {
                self.dry += 1;
                let r = self.rule.inner();
                if r.count.is_none()
                    && r.until.is_none()
                    && self.dry >= DRY_PERIOD_LIMIT
                {
                    log::warn!(
                        "unbounded rule produced no candidates for \
                         {DRY_PERIOD_LIMIT} consecutive periods \
                         (last period at {:?}); ending iteration",
                        self.cur,
                    );
                    self.cur = None;
                    return None;
                }
            } else {
                self.dry = 0;
            }
            self.cur = self.advance();
        }
        None
    }
}

impl<'r> std::iter::FusedIterator for Occurrences<'r> {}

/// The candidates of one period.
///
/// Civil candidates are kept sorted descending after `seal` so popping from
/// the back yields ascending order. The `zoned` side only comes into play
/// for BYSETPOS, which has to materialize and index the whole period.
#[derive(Clone, Debug, Default)]
struct CandidateSet {
    civil: Vec<DateTime>,
    zoned: Vec<Zoned>,
    /// The later instant of a DST fold, emitted right after the earlier
    /// one.
    queued: Option<Zoned>,
}

impl CandidateSet {
    fn is_empty(&self) -> bool {
        self.civil.is_empty() && self.zoned.is_empty() && self.queued.is_none()
    }

    fn insert(&mut self, dt: DateTime) {
        self.civil.push(dt);
    }

    fn clear(&mut self) {
        self.civil.clear();
        self.zoned.clear();
        self.queued = None;
    }

    fn retain(&mut self, keep: impl FnMut(&DateTime) -> bool) {
        self.civil.retain(keep);
    }

    /// Replaces every candidate with its expansion.
    fn expand<I>(&mut self, expansion: impl Fn(DateTime) -> I)
    where
        I: Iterator<Item = DateTime>,
    {
        let len = self.civil.len();
        for i in 0..len {
            let dt = self.civil[i];
            self.civil.extend(expansion(dt));
        }
        self.civil.drain(..len);
    }

    /// Sorts (descending, for back-popping) and de-duplicates.
    fn seal(&mut self) {
        self.civil.sort_by(|a, b| b.cmp(a));
        self.civil.dedup();
    }
}

/// Expands one period of one rule into a candidate set.
///
/// Which filters expand (multiply candidates within the period) and which
/// limit (discard candidates) depends on the frequency; the per-frequency
/// methods below encode the table in RFC 5545 §3.3.10. Filters the rule
/// doesn't set contribute nothing, leaving that component at the anchor's
/// value.
#[derive(Clone, Copy, Debug)]
struct Expansion<'a> {
    rule: &'a RuleInner,
    /// The civil datetime whose period is being expanded.
    cur: DateTime,
    /// The anchor's civil datetime.
    start: DateTime,
}

impl Expansion<'_> {
    fn fill(&self, set: &mut CandidateSet) {
        match self.rule.freq {
            Frequency::Yearly => self.yearly(set),
            Frequency::Monthly => self.monthly(set),
            Frequency::Weekly => self.weekly(set),
            Frequency::Daily => self.daily(set),
            Frequency::Hourly => self.hourly(set),
            Frequency::Minutely => self.minutely(set),
            Frequency::Secondly => self.secondly(set),
        }
        set.seal();
    }

    fn yearly(&self, set: &mut CandidateSet) {
        set.insert(self.cur);
        if !self.rule.by_week_day.is_empty() {
            if !self.rule.by_week.is_empty() {
                self.spread_weeks(set);
                self.spread_week_days_weekly(set);
                self.keep_months(set);
            } else if !self.rule.by_month.is_empty() {
                self.spread_months(set);
                self.spread_week_days_monthly(set);
            } else {
                self.spread_week_days_yearly(set);
            }
            self.keep_year_days(set);
            self.keep_month_days(set);
        } else if !self.rule.by_week.is_empty() {
            self.spread_weeks(set);
            // BYWEEKNO expands to every day of each named week, where
            // BYMONTH at this frequency only moves the anchor's day into
            // each named month. Odd, but it's what python-dateutil does.
            set.expand(|dt| {
                (0..=6).filter_map(move |n| dt.checked_add(n.days()).ok())
            });
            self.keep_months(set);
            self.keep_year_days(set);
            self.keep_month_days(set);
        } else if !self.rule.by_month.is_empty() {
            self.spread_months(set);
            self.spread_month_days(set);
            self.keep_year_days(set);
        } else if !self.rule.by_month_day.is_empty() {
            set.expand(|dt| {
                (1..=12).filter_map(move |month| {
                    dt.with().month(month).build().ok()
                })
            });
            self.spread_month_days(set);
            self.keep_year_days(set);
        } else if !self.rule.by_year_day.is_empty() {
            self.spread_year_days(set);
        }
        self.spread_hours(set);
        self.spread_minutes(set);
        self.spread_seconds(set);
    }

    fn monthly(&self, set: &mut CandidateSet) {
        // BYWEEKNO and BYYEARDAY are rejected at this frequency.
        if !self.admits_month(self.cur) {
            return;
        }
        set.insert(self.cur);
        if !self.rule.by_week_day.is_empty() {
            self.spread_week_days_monthly(set);
            self.keep_month_days(set);
        } else {
            self.spread_month_days(set);
        }
        self.spread_hours(set);
        self.spread_minutes(set);
        self.spread_seconds(set);
    }

    fn weekly(&self, set: &mut CandidateSet) {
        // BYWEEKNO, BYYEARDAY and BYMONTHDAY are rejected at this
        // frequency, and BYDAY entries are all bare weekdays.
        if !self.admits_month(self.cur) {
            return;
        }
        set.insert(self.cur);
        self.spread_week_days_weekly(set);
        self.spread_hours(set);
        self.spread_minutes(set);
        self.spread_seconds(set);
    }

    fn daily(&self, set: &mut CandidateSet) {
        if !self.admits_month(self.cur)
            || !self.admits_month_day(self.cur)
            || !self.admits_week_day(self.cur)
        {
            return;
        }
        set.insert(self.cur);
        self.spread_hours(set);
        self.spread_minutes(set);
        self.spread_seconds(set);
    }

    fn hourly(&self, set: &mut CandidateSet) {
        if !self.admits_month(self.cur)
            || !self.admits_year_day(self.cur)
            || !self.admits_month_day(self.cur)
            || !self.admits_week_day(self.cur)
            || !self.admits_hour(self.cur)
        {
            return;
        }
        set.insert(self.cur);
        self.spread_minutes(set);
        self.spread_seconds(set);
    }

    fn minutely(&self, set: &mut CandidateSet) {
        if !self.admits_month(self.cur)
            || !self.admits_year_day(self.cur)
            || !self.admits_month_day(self.cur)
            || !self.admits_week_day(self.cur)
            || !self.admits_hour(self.cur)
            || !self.admits_minute(self.cur)
        {
            return;
        }
        set.insert(self.cur);
        self.spread_seconds(set);
    }

    fn secondly(&self, set: &mut CandidateSet) {
        if !self.admits_month(self.cur)
            || !self.admits_year_day(self.cur)
            || !self.admits_month_day(self.cur)
            || !self.admits_week_day(self.cur)
            || !self.admits_hour(self.cur)
            || !self.admits_minute(self.cur)
            || !self.admits_second(self.cur)
        {
            return;
        }
        set.insert(self.cur);
    }

    fn admits_month(&self, dt: DateTime) -> bool {
        self.rule.by_month.is_empty()
            || self.rule.by_month.contains(&dt.month())
    }

    fn admits_year_day(&self, dt: DateTime) -> bool {
        if self.rule.by_year_day.is_empty() {
            return true;
        }
        let positive = dt.day_of_year();
        // -1 is the last day of the year and days are one-indexed.
        let negative = positive - 1 - dt.days_in_year();
        self.rule.by_year_day.binary_search(&positive).is_ok()
            || self.rule.by_year_day.binary_search(&negative).is_ok()
    }

    fn admits_month_day(&self, dt: DateTime) -> bool {
        if self.rule.by_month_day.is_empty() {
            return true;
        }
        let positive = dt.day();
        // -1 is the last day of the month and days are one-indexed.
        let negative = positive - 1 - dt.days_in_month();
        self.rule.by_month_day.binary_search(&positive).is_ok()
            || self.rule.by_month_day.binary_search(&negative).is_ok()
    }

    /// Only called at frequencies where BYDAY entries are bare weekdays;
    /// see [`ByWeekday::admits`].
    fn admits_week_day(&self, dt: DateTime) -> bool {
        self.rule.by_week_day.is_empty()
            || self
                .rule
                .by_week_day
                .iter()
                .any(|bwd| bwd.admits(dt.weekday()))
    }

    fn admits_hour(&self, dt: DateTime) -> bool {
        self.rule.by_hour.is_empty() || self.rule.by_hour.contains(&dt.hour())
    }

    fn admits_minute(&self, dt: DateTime) -> bool {
        self.rule.by_minute.is_empty()
            || self.rule.by_minute.contains(&dt.minute())
    }

    fn admits_second(&self, dt: DateTime) -> bool {
        self.rule.by_second.is_empty()
            || self.rule.by_second.contains(&dt.second())
    }

    fn keep_months(&self, set: &mut CandidateSet) {
        if !self.rule.by_month.is_empty() {
            set.retain(|dt| self.admits_month(*dt));
        }
    }

    fn keep_year_days(&self, set: &mut CandidateSet) {
        if !self.rule.by_year_day.is_empty() {
            set.retain(|dt| self.admits_year_day(*dt));
        }
    }

    fn keep_month_days(&self, set: &mut CandidateSet) {
        if !self.rule.by_month_day.is_empty() {
            set.retain(|dt| self.admits_month_day(*dt));
        }
    }

    fn spread_months(&self, set: &mut CandidateSet) {
        if !self.rule.by_month.is_empty() {
            set.expand(|dt| self.months_of(dt));
        }
    }

    fn spread_weeks(&self, set: &mut CandidateSet) {
        if !self.rule.by_week.is_empty() {
            set.expand(|dt| self.weeks_of(dt));
        }
    }

    fn spread_year_days(&self, set: &mut CandidateSet) {
        if !self.rule.by_year_day.is_empty() {
            set.expand(|dt| self.year_days_of(dt));
        }
    }

    fn spread_month_days(&self, set: &mut CandidateSet) {
        if !self.rule.by_month_day.is_empty() {
            set.expand(|dt| self.month_days_of(dt));
        }
    }

    fn spread_week_days_yearly(&self, set: &mut CandidateSet) {
        if self.rule.by_week_day.is_empty() {
            return;
        }
        set.expand(|dt| {
            let start = dt.first_of_year();
            let end = dt.last_of_year();
            self.rule
                .by_week_day
                .iter()
                .copied()
                .flat_map(move |bwd| bwd.dates_in_year(start, end))
        });
    }

    fn spread_week_days_monthly(&self, set: &mut CandidateSet) {
        if self.rule.by_week_day.is_empty() {
            return;
        }
        set.expand(|dt| {
            let start = dt.first_of_month();
            let end = dt.last_of_month();
            self.rule
                .by_week_day
                .iter()
                .copied()
                .flat_map(move |bwd| bwd.dates_in_month(start, end))
        });
    }

    fn spread_week_days_weekly(&self, set: &mut CandidateSet) {
        if self.rule.by_week_day.is_empty() {
            return;
        }
        let week_start = self.rule.week_start;
        set.expand(|dt| {
            let bounds = weekdate::first_of_week(week_start, dt.date())
                .zip(weekdate::last_of_week(week_start, dt.date()))
                .and_then(|(first, last)| {
                    let start = dt.with().date(first).build().ok()?;
                    let end = dt.with().date(last).build().ok()?;
                    Some((start, end))
                });
            let week_days = &self.rule.by_week_day;
            bounds.into_iter().flat_map(move |(start, end)| {
                week_days
                    .iter()
                    .copied()
                    .flat_map(move |bwd| bwd.dates_in_week(start, end))
            })
        });
    }

    fn spread_hours(&self, set: &mut CandidateSet) {
        if !self.rule.by_hour.is_empty() {
            set.expand(|dt| self.hours_of(dt));
        }
    }

    fn spread_minutes(&self, set: &mut CandidateSet) {
        if !self.rule.by_minute.is_empty() {
            set.expand(|dt| self.minutes_of(dt));
        }
    }

    fn spread_seconds(&self, set: &mut CandidateSet) {
        if !self.rule.by_second.is_empty() {
            set.expand(|dt| self.seconds_of(dt));
        }
    }

    fn months_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        // The day comes from the anchor, not from `dt`: when the anchor is
        // Feb 29 and no other date rule applies, the cursor day may already
        // have been clamped to 28, and substituting the month must restore
        // the real day.
        let day = self.start.day();
        self.rule.by_month.iter().copied().filter_map(move |month| {
            dt.with().month(month).day(day).build().ok()
        })
    }

    fn weeks_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let week_start = self.rule.week_start;
        let weeks_in_year = WeekDate::from_date(week_start, dt.date())
            .map(|wd| wd.weeks_in_year());
        self.rule.by_week.iter().copied().filter_map(move |mut week| {
            if week < 0 {
                // -1 is the last week of the year and weeks are
                // one-indexed.
                week = weeks_in_year?.checked_add(week + 1)?;
            }
            let start =
                WeekDate::new(week_start, dt.year(), week, week_start)?;
            dt.with().date(start.to_date()?).build().ok()
        })
    }

    fn year_days_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let days_in_year = dt.days_in_year();
        self.rule.by_year_day.iter().copied().filter_map(move |mut day| {
            if day < 0 {
                // -1 is the last day of the year and days are one-indexed.
                day = days_in_year.checked_add(day + 1)?;
            }
            dt.with().day_of_year(day).build().ok()
        })
    }

    fn month_days_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        let days_in_month = dt.days_in_month();
        self.rule.by_month_day.iter().copied().filter_map(move |mut day| {
            if day < 0 {
                // -1 is the last day of the month and days are one-indexed.
                day = days_in_month.checked_add(day + 1)?;
            }
            dt.with().day(day).build().ok()
        })
    }

    fn hours_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule.by_hour.iter().copied().filter_map(move |hour| {
            dt.with().hour(hour).build().ok()
        })
    }

    fn minutes_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule.by_minute.iter().copied().filter_map(move |minute| {
            dt.with().minute(minute).build().ok()
        })
    }

    fn seconds_of(&self, dt: DateTime) -> impl Iterator<Item = DateTime> {
        self.rule.by_second.iter().copied().filter_map(move |second| {
            dt.with().second(second).build().ok()
        })
    }
}

impl ByWeekday {
    /// The dates matching this entry within one year, `start` and `end`
    /// being that year's first and last days (with the candidate's time of
    /// day).
    ///
    /// Ordinal entries resolve to at most one date: positive ordinals count
    /// from `start`, negative from `end`.
    fn dates_in_year(
        self,
        start: DateTime,
        end: DateTime,
    ) -> impl Iterator<Item = DateTime> + use<> {
        match self {
            ByWeekday::Every(weekday) => {
                Either::Left(weekdays_between(weekday, start, end))
            }
            ByWeekday::Nth { nth, weekday } => Either::Right(
                nth_weekday_in(nth, weekday, start, end).into_iter(),
            ),
        }
    }

    /// The dates matching this entry within one month, `start` and `end`
    /// being that month's first and last days.
    fn dates_in_month(
        self,
        start: DateTime,
        end: DateTime,
    ) -> impl Iterator<Item = DateTime> + use<> {
        match self {
            ByWeekday::Every(weekday) => {
                Either::Left(weekdays_between(weekday, start, end))
            }
            ByWeekday::Nth { nth, weekday } => Either::Right(
                start.nth_weekday_of_month(nth, weekday).ok().into_iter(),
            ),
        }
    }

    /// The dates matching this entry within one week, `start` and `end`
    /// being that week's first and last days.
    fn dates_in_week(
        self,
        start: DateTime,
        end: DateTime,
    ) -> impl Iterator<Item = DateTime> + use<> {
        match self {
            ByWeekday::Every(weekday) => {
                weekdays_between(weekday, start, end)
            }
            // Validation rejects ordinal weekdays at weekly and finer
            // frequencies.
            ByWeekday::Nth { .. } => unreachable!(),
        }
    }
}

/// Resolves an ordinal weekday within `[start, end]`: the nth matching
/// weekday counted forward from `start` when positive, backward from `end`
/// when negative. `None` when the range doesn't hold that many.
fn nth_weekday_in(
    nth: i8,
    weekday: Weekday,
    start: DateTime,
    end: DateTime,
) -> Option<DateTime> {
    // `nth_weekday` never counts its own date, so when the boundary day is
    // already the target weekday, the ordinal shrinks by one.
    if nth >= 0 {
        let nth = if start.weekday() != weekday {
            nth
        } else if nth == 1 {
            return Some(start);
        } else {
            nth - 1
        };
        start
            .nth_weekday(i32::from(nth), weekday)
            .ok()
            .filter(|dt| dt <= &end)
    } else {
        let nth = if end.weekday() != weekday {
            nth
        } else if nth == -1 {
            return Some(end);
        } else {
            nth + 1
        };
        end.nth_weekday(i32::from(nth), weekday)
            .ok()
            .filter(|dt| dt >= &start)
    }
}

/// Every date with the given weekday in `[start, end]`, ascending.
fn weekdays_between(
    weekday: Weekday,
    start: DateTime,
    end: DateTime,
) -> impl Iterator<Item = DateTime> {
    let first = if start.weekday() == weekday {
        Some(start)
    } else {
        start.nth_weekday(1, weekday).ok()
    };
    let mut cur = first.filter(|dt| dt <= &end);
    std::iter::from_fn(move || {
        let next = cur.take()?;
        cur = next.nth_weekday(1, weekday).ok().filter(|dt| dt <= &end);
        Some(next)
    })
}

/// True when the 0-indexed `position` in a sorted period set of length
/// `len` is named by BYSETPOS (which is 1-indexed, negative from the end).
fn position_selected(
    by_set_pos: &[i32],
    position: usize,
    len: usize,
) -> bool {
    let Ok(position) = i32::try_from(position) else { return false };
    let Ok(len) = i32::try_from(len) else { return false };
    let positive = position + 1;
    let negative = positive - 1 - len;
    by_set_pos.binary_search(&positive).is_ok()
        || by_set_pos.binary_search(&negative).is_ok()
}

/// The number of whole frequency units from `from` to `to`.
fn units_between(
    freq: Frequency,
    from: DateTime,
    to: DateTime,
) -> Option<i64> {
    let unit = match freq {
        Frequency::Secondly => Unit::Second,
        Frequency::Minutely => Unit::Minute,
        Frequency::Hourly => Unit::Hour,
        Frequency::Daily => Unit::Day,
        Frequency::Weekly => Unit::Week,
        Frequency::Monthly => Unit::Month,
        Frequency::Yearly => Unit::Year,
    };
    let span: Span =
        from.until(DateTimeDifference::new(to).largest(unit)).ok()?;
    let units = match freq {
        Frequency::Secondly => span.get_seconds(),
        Frequency::Minutely => span.get_minutes(),
        Frequency::Hourly => i64::from(span.get_hours()),
        Frequency::Daily => i64::from(span.get_days()),
        Frequency::Weekly => i64::from(span.get_weeks()),
        Frequency::Monthly => i64::from(span.get_months()),
        Frequency::Yearly => i64::from(span.get_years()),
    };
    Some(units)
}

/// A minimal either-iterator, for methods whose arms produce different
/// iterator types.
enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R, T> Iterator for Either<L, R>
where
    L: Iterator<Item = T>,
    R: Iterator<Item = T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match *self {
            Either::Left(ref mut iter) => iter.next(),
            Either::Right(ref mut iter) => iter.next(),
        }
    }
}
