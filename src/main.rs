use std::{
    env,
    io::{Read, Write},
    process::ExitCode,
};

use anyhow::Context;

mod logger;

const USAGE: &str = "\
Expand RFC 5545 recurrence rules.

The rule text (a DTSTART line followed by an RRULE line) is read from
stdin, or from a file via -r/--rule-file.

USAGE:
    reprise next [-c/--count <n>]
    reprise between <start> <end> [-i/--inclusive]
    reprise before <cutoff> [-i/--inclusive]
    reprise after <cutoff> [-i/--inclusive]
    reprise props
    reprise check <anchor>

Timestamps are RFC 3339, e.g. 2023-03-27T00:00:00.000+01:00.

EXAMPLES:
    Next five Friday-the-13ths:

        $ printf 'DTSTART:20250101T090000Z\\nRRULE:FREQ=MONTHLY;BYDAY=FR;BYMONTHDAY=13' \\
            | reprise next -c5

    The rule's fields, as JSON:

        $ printf 'RRULE:FREQ=WEEKLY;BYDAY=TU,TH' | reprise props

Set REPRISE_LOG=warn (or debug, trace) to see engine diagnostics on stderr.
";

fn main() -> ExitCode {
    let err = match run() {
        Ok(code) => return code,
        Err(err) => err,
    };
    // A broken pipe means whoever was reading us went away (`reprise ... |
    // head`); exit quietly with success, per Unix convention.
    for cause in err.chain() {
        if let Some(ioerr) = cause.downcast_ref::<std::io::Error>() {
            if ioerr.kind() == std::io::ErrorKind::BrokenPipe {
                return ExitCode::from(0);
            }
        }
    }
    writeln!(&mut std::io::stderr(), "{err:#}").unwrap();
    ExitCode::from(1)
}

fn run() -> anyhow::Result<ExitCode> {
    let level = match &*env::var("REPRISE_LOG").unwrap_or_default() {
        "" | "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        unk => anyhow::bail!("unrecognized log level '{unk}'"),
    };
    logger::Logger::init()?;
    log::set_max_level(level);

    let mut config = Config::default();
    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        use lexopt::{Arg::*, ValueExt};

        match arg {
            Value(value) => {
                let value = value
                    .into_string()
                    .map_err(|v| anyhow::anyhow!("invalid argument {v:?}"))?;
                if config.mode.is_none() {
                    config.mode = Some(value);
                } else {
                    config.args.push(value);
                }
            }
            Short('c') | Long("count") => {
                config.limit = Some(parser.value()?.parse()?);
            }
            Short('i') | Long("inclusive") => config.inclusive = true,
            Short('r') | Long("rule-file") => {
                config.rule_file = Some(parser.value()?.into());
            }
            Short('h') | Long("help") => {
                writeln!(std::io::stdout(), "{USAGE}")?;
                return Ok(ExitCode::SUCCESS);
            }
            arg => return Err(arg.unexpected().into()),
        }
    }
    let Some(ref mode) = config.mode else {
        anyhow::bail!("missing <mode> (use -h for usage)");
    };

    let text = config.rule_text()?;
    let mut out = std::io::stdout().lock();
    match mode.as_str() {
        "next" => {
            let limit = config.limit.unwrap_or(10);
            for ts in reprise::next(&text, limit)? {
                writeln!(out, "{ts}")?;
            }
        }
        "between" => {
            let (start, end) = config.two_args("between <start> <end>")?;
            let found =
                reprise::between(&text, start, end, config.inclusive)?;
            for ts in found {
                writeln!(out, "{ts}")?;
            }
        }
        "before" => {
            let cutoff = config.one_arg("before <cutoff>")?;
            if let Some(ts) =
                reprise::just_before(&text, cutoff, config.inclusive)?
            {
                writeln!(out, "{ts}")?;
            }
        }
        "after" => {
            let cutoff = config.one_arg("after <cutoff>")?;
            if let Some(ts) =
                reprise::just_after(&text, cutoff, config.inclusive)?
            {
                writeln!(out, "{ts}")?;
            }
        }
        "props" => {
            let props = reprise::properties(&text)?;
            serde_json::to_writer_pretty(&mut out, &props)?;
            writeln!(out)?;
        }
        "check" => {
            let anchor = config.one_arg("check <anchor>")?;
            reprise::validate_rule(&text, anchor)?;
            writeln!(out, "ok")?;
        }
        unk => anyhow::bail!("unrecognized mode '{unk}' (use -h for usage)"),
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Default)]
struct Config {
    mode: Option<String>,
    args: Vec<String>,
    limit: Option<usize>,
    inclusive: bool,
    rule_file: Option<std::path::PathBuf>,
}

impl Config {
    fn rule_text(&self) -> anyhow::Result<String> {
        match self.rule_file {
            Some(ref path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            None => {
                let mut text = String::new();
                std::io::stdin()
                    .read_to_string(&mut text)
                    .context("failed to read rule text from stdin")?;
                Ok(text)
            }
        }
    }

    fn one_arg(&self, usage: &str) -> anyhow::Result<&str> {
        match self.args.as_slice() {
            [arg] => Ok(arg),
            _ => anyhow::bail!("expected exactly one argument: {usage}"),
        }
    }

    fn two_args(&self, usage: &str) -> anyhow::Result<(&str, &str)> {
        match self.args.as_slice() {
            [first, second] => Ok((first, second)),
            _ => anyhow::bail!("expected exactly two arguments: {usage}"),
        }
    }
}
