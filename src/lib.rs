/*!
An RFC 5545 recurrence rule engine.

Reprise parses `RRULE`/`DTSTART` text into a validated [`Rule`], expands
rules into lazy sequences of zoned datetimes and answers windowed queries
over them. It is a pure library: no I/O, no shared state, every operation a
deterministic function of its inputs, so rules can be processed from any
number of threads without coordination.

# Text operations

The functions at the crate root work on rule text and RFC 3339 timestamps,
mirroring the wire formats end to end:

```
let text = "DTSTART;TZID=America/New_York:19970902T090000\n\
            RRULE:FREQ=WEEKLY;BYDAY=TU,TH";
let first = reprise::next(text, 2)?;
assert_eq!(
    first,
    vec![
        "1997-09-02T09:00:00.000-04:00".to_string(),
        "1997-09-04T09:00:00.000-04:00".to_string(),
    ],
);
# Ok::<(), reprise::Error>(())
```

# Typed API

[`Rule`] (built by the parser or by [`Rule::builder`]) plus an anchor
`jiff::Zoned` gives [`Rule::occurrences`], a lazy iterator, and the
windowed queries [`Rule::between`], [`Rule::just_before`] and
[`Rule::just_after`]. Windowed queries generate periods near the requested
window instead of scanning from the anchor whenever the rule's bounds allow
it.

Rules without COUNT or UNTIL are unbounded. Iteration still terminates:
either the calendar runs out, or the generator notices several hundred
consecutive periods yielding nothing (a rule like
`FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=30` never yields anything) and gives up.
*/

pub use crate::{
    error::{
        CalendarError, DateTimeParseError, Error, ParseError,
        ValidationError,
    },
    generate::Occurrences,
    rule::{
        ByWeekday, Frequency, Properties, Rule, RuleBuilder, WeekdayEntry,
    },
    serialize::serialize_rule,
};

use jiff::{Timestamp, Zoned};

mod error;
mod generate;
mod parse;
mod rule;
mod serialize;
mod validate;
mod weekdate;

/// Expands the rule in `text` (DTSTART plus RRULE) and returns up to
/// `limit` occurrences from the anchor forward, formatted as RFC 3339
/// timestamps. The rule's own COUNT/UNTIL can end the sequence earlier.
pub fn next(text: &str, limit: usize) -> Result<Vec<String>, Error> {
    let (rule, anchor) = parse::rule_set(text)?;
    Ok(rule
        .occurrences(&anchor)
        .take(limit)
        .map(|zdt| format_timestamp(&zdt))
        .collect())
}

/// Returns every occurrence of the rule in `text` between `start` and
/// `end`, both RFC 3339 timestamps. `inclusive` governs both boundaries
/// symmetrically.
pub fn between(
    text: &str,
    start: &str,
    end: &str,
    inclusive: bool,
) -> Result<Vec<String>, Error> {
    let (rule, anchor) = parse::rule_set(text)?;
    let start = query_instant(start)?;
    let end = query_instant(end)?;
    Ok(rule
        .between(&anchor, start, end, inclusive)
        .iter()
        .map(format_timestamp)
        .collect())
}

/// Returns the latest occurrence of the rule in `text` before `cutoff`
/// (at it, when `inclusive`), or `None` when nothing precedes it.
pub fn just_before(
    text: &str,
    cutoff: &str,
    inclusive: bool,
) -> Result<Option<String>, Error> {
    let (rule, anchor) = parse::rule_set(text)?;
    let cutoff = query_instant(cutoff)?;
    Ok(rule
        .just_before(&anchor, cutoff, inclusive)
        .map(|zdt| format_timestamp(&zdt)))
}

/// Returns the earliest occurrence of the rule in `text` after `cutoff`
/// (at it, when `inclusive`), or `None` when the rule ends first.
pub fn just_after(
    text: &str,
    cutoff: &str,
    inclusive: bool,
) -> Result<Option<String>, Error> {
    let (rule, anchor) = parse::rule_set(text)?;
    let cutoff = query_instant(cutoff)?;
    Ok(rule
        .just_after(&anchor, cutoff, inclusive)
        .map(|zdt| format_timestamp(&zdt)))
}

/// Parses the rule in `text` and returns its diagnostic field view. A
/// DTSTART line is allowed but not required.
pub fn properties(text: &str) -> Result<Properties, Error> {
    let (rule, _) = parse::components(text)?;
    Ok(rule.properties())
}

/// Parses the rule in `text` into a [`Rule`]. Accepts a bare RRULE line or
/// full DTSTART/RRULE text (the anchor, if any, is ignored).
pub fn parse_rule(text: &str) -> Result<Rule, Error> {
    let (rule, _) = parse::components(text)?;
    Ok(rule)
}

/// Validates the rule in `text` against an RFC 3339 `anchor` timestamp.
///
/// Field ranges are checked first, then the anchor: an impossible calendar
/// date ("February 32") reports a [`CalendarError`] naming the month, any
/// other unparsable anchor a [`DateTimeParseError`] carrying the string.
/// Validation is idempotent and has no side effects.
pub fn validate_rule(text: &str, anchor: &str) -> Result<(), Error> {
    let (rule, _) = parse::components(text)?;
    rule.validate()?;
    validate::instant(anchor)?;
    Ok(())
}

/// Formats an occurrence the way every operation here reports instants:
/// RFC 3339 with millisecond precision and a numeric offset, e.g.
/// `2023-03-27T00:00:00.000+01:00`.
pub fn format_timestamp(zdt: &Zoned) -> String {
    zdt.strftime("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}

fn query_instant(input: &str) -> Result<Timestamp, Error> {
    input
        .parse::<Timestamp>()
        .map_err(|_| validate::classify_instant(input))
}
