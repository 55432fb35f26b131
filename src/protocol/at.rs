//! AT command dialect spoken by the headset on its hands-free channel.
//!
//! We play the audio-gateway side just far enough for the headset to start
//! reporting its battery. Each inbound line is matched against [`RULES`] in
//! order; the first rule whose pattern occurs in the line decides the outcome.
//! Lines matching no rule are acknowledged with a bare `OK`.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const OK: &str = "OK";

/// Parses a battery-bearing status line. `Ok(None)` means the line was
/// well-formed but carried no battery value.
pub type StatusParser = fn(&str) -> Result<Option<f64>>;

#[derive(Clone, Copy)]
pub enum RuleAction {
    /// Send these lines back, each framed.
    Reply(&'static [&'static str]),
    /// Consume silently and try to extract a battery value.
    Status(StatusParser),
}

#[derive(Clone, Copy)]
pub struct AtRule {
    pub pattern: &'static str,
    pub action: RuleAction,
}

pub const RULES: &[AtRule] = &[
    AtRule {
        pattern: "BRSF",
        action: RuleAction::Reply(&["+BRSF: 1024", OK]),
    },
    AtRule {
        pattern: "CIND=",
        action: RuleAction::Reply(&["+CIND: (\"battchg\",(0-5))", OK]),
    },
    AtRule {
        pattern: "CIND?",
        action: RuleAction::Reply(&["+CIND: 5", OK]),
    },
    AtRule {
        pattern: "BIND=?",
        action: RuleAction::Reply(&["+BIND: (2)", OK]),
    },
    AtRule {
        pattern: "BIND?",
        action: RuleAction::Reply(&["+BIND: 2,1", OK]),
    },
    AtRule {
        pattern: "XAPL=",
        action: RuleAction::Reply(&["+XAPL: iPhone,7", OK]),
    },
    AtRule {
        pattern: "IPHONEACCEV",
        action: RuleAction::Status(parse_iphoneaccev),
    },
    AtRule {
        pattern: "BIEV=",
        action: RuleAction::Status(parse_biev),
    },
    AtRule {
        pattern: "XEVENT=BATTERY",
        action: RuleAction::Status(parse_xevent),
    },
];

const GENERIC_REPLY: &[&str] = &[OK];

/// What the session should do with one inbound line.
#[derive(Debug)]
pub enum LineOutcome {
    Reply(&'static [&'static str]),
    Battery(f64),
    /// Status line without a battery value.
    Consumed,
    /// Status line that failed to parse; ignored by the session.
    Malformed(Error),
}

pub fn classify(line: &str) -> LineOutcome {
    let Some(rule) = RULES.iter().find(|r| line.contains(r.pattern)) else {
        return LineOutcome::Reply(GENERIC_REPLY);
    };

    match rule.action {
        RuleAction::Reply(lines) => LineOutcome::Reply(lines),
        RuleAction::Status(parse) => match parse(line) {
            Ok(Some(level)) => LineOutcome::Battery(level),
            Ok(None) => LineOutcome::Consumed,
            Err(e) => LineOutcome::Malformed(e),
        },
    }
}

/// Wrap a reply as `\r\n<text>\r\n`.
pub fn frame(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 4);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Text following `command` and its `=`/`,` separator.
fn params_after<'a>(line: &'a str, command: &str) -> &'a str {
    let start = line
        .find(command)
        .map(|i| i + command.len())
        .unwrap_or(line.len());
    line[start..]
        .trim_start_matches(|c: char| c == '=' || c == ',')
        .trim()
}

fn malformed(line: &str, reason: &str) -> Error {
    Error::MalformedStatusLine(format!("{reason}: {line:?}"))
}

fn parse_number(line: &str, token: &str) -> Result<f64> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| malformed(line, "not a number"))?;
    if !value.is_finite() {
        return Err(malformed(line, "not a number"));
    }
    Ok(value)
}

/// Apple accessory event: `IPHONEACCEV=<count>,<key>,<value>,...`.
/// Key `1` is battery in tenths minus one, i.e. `(value + 1) * 10`.
pub fn parse_iphoneaccev(line: &str) -> Result<Option<f64>> {
    let params = params_after(line, "IPHONEACCEV");
    let pairs: Vec<&str> = params.split(',').map(str::trim).skip(1).collect();
    if pairs.len() % 2 != 0 {
        return Err(malformed(line, "odd key/value token count"));
    }

    let map: HashMap<&str, &str> = pairs.chunks(2).map(|kv| (kv[0], kv[1])).collect();
    match map.get("1") {
        Some(value) => Ok(Some((parse_number(line, value)? + 1.0) * 10.0)),
        None => Ok(None),
    }
}

/// HF indicator update: `BIEV=<indicator>,<value>`; indicator 2 is battery percent.
pub fn parse_biev(line: &str) -> Result<Option<f64>> {
    let params: Vec<&str> = params_after(line, "BIEV=").split(',').map(str::trim).collect();
    if params.len() < 2 {
        return Err(malformed(line, "missing indicator value"));
    }
    if params[0] != "2" {
        return Ok(None);
    }
    parse_number(line, params[1]).map(Some)
}

/// Plantronics-style event: `XEVENT=BATTERY,<level>,<levels>,...`.
pub fn parse_xevent(line: &str) -> Result<Option<f64>> {
    let params: Vec<&str> = params_after(line, "XEVENT=")
        .split(|c: char| c == ',' || c == '=')
        .map(str::trim)
        .collect();
    if params.len() < 3 {
        return Err(malformed(line, "missing battery ratio"));
    }
    let level = parse_number(line, params[1])?;
    let levels = parse_number(line, params[2])?;
    if levels == 0.0 {
        return Err(malformed(line, "zero battery scale"));
    }
    Ok(Some(level / levels * 100.0))
}
