//! Wire codec for the `tarantoolctl connect` console.
//!
//! A call is shipped as a Lua chunk on the console's standard input. The
//! chunk decodes its JSON arguments, runs the caller's script inside
//! `pcall` and returns `{ok, res}` where `res` is the base64 of the JSON
//! encoded result. The console echoes the returned table as a YAML
//! document:
//!
//! ```text
//! ---
//! - ok: true
//!   res: WyJ2c2hhcmQtcm91dGVyIl0=
//! ...
//! ```
//!
//! Older wrappers emitted the payload under a `hex` key instead of `res`;
//! both are accepted when decoding.

use crate::error::{Result, TopologyError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

macro_rules! static_regex {
    ($pattern:expr, $name:expr) => {
        Regex::new($pattern).unwrap_or_else(|_| {
            panic!(
                "Static regex '{}' failed to compile - this is a bug in the driver",
                $name
            )
        })
    };
}

static LEADING_PATTERN: Lazy<Regex> =
    Lazy::new(|| static_regex!(r"(?m)^---\n-\s+?", "LEADING_PATTERN"));

static TRAILING_PATTERN: Lazy<Regex> =
    Lazy::new(|| static_regex!(r"(?m)\n.{3}\n?$", "TRAILING_PATTERN"));

static RESULT_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| static_regex!(r"(?m)\n(\s*)(res|hex):", "RESULT_KEY_PATTERN"));

/// Shell command that pipes standard input into the instance console.
pub const CONSOLE_COMMAND: &str =
    "cat /dev/stdin | tarantoolctl connect `ls $CARTRIDGE_RUN_DIR/*.control` ";

/// An exec invocation: argv plus the data to write to standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Process arguments.
    pub argv: Vec<String>,
    /// Lua chunk sent on standard input.
    pub stdin: String,
}

#[derive(Debug, Deserialize)]
struct ConsoleRecord {
    ok: bool,
    #[serde(default)]
    res: Option<serde_yaml::Value>,
    #[serde(default)]
    hex: Option<serde_yaml::Value>,
}

/// YAML may read an all-digit payload as a number.
fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.trim().to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Wraps `script` so that it runs with `args` unpacked as `...`.
pub fn encode(script: &str, args: &[Value]) -> Result<Command> {
    let quoted_args = if args.is_empty() {
        "'{}'".to_string()
    } else {
        lua_quote(&serde_json::to_string(args)?)
    };

    let chunk = format!(
        "
local digest = require('digest')
local json = require('json')
local args = json.decode({quoted_args})
local func = function(...)
    {script}
end
local ok, result
ok, result = pcall(func, unpack(args))
return {{ok=ok,res=digest.base64_encode(json.encode(result)),}}
"
    )
    .replace('\t', "");

    Ok(Command {
        argv: vec!["sh".into(), "-c".into(), CONSOLE_COMMAND.into()],
        stdin: chunk,
    })
}

/// Extracts the JSON payload from a console transcript.
///
/// A payload with `ok == false` is the error raised by the script and is
/// returned as [`TopologyError::Remote`].
pub fn decode(transcript: &str) -> Result<Value> {
    let body = LEADING_PATTERN.replace_all(transcript, "");
    let body = TRAILING_PATTERN.replace_all(&body, "");
    let body = RESULT_KEY_PATTERN.replace_all(&body, "\n$2:");

    let record: Option<ConsoleRecord> = serde_yaml::from_str(&body)
        .map_err(|e| TopologyError::Transcript(format!("{e}: {transcript:?}")))?;
    let record = record.ok_or_else(|| TopologyError::Transcript(transcript.to_string()))?;

    let payload = match (
        record.res.as_ref().and_then(scalar_text),
        record.hex.as_ref().and_then(scalar_text),
    ) {
        (Some(res), _) => STANDARD
            .decode(res)
            .map_err(|e| TopologyError::Transcript(format!("invalid base64 payload: {e}")))?,
        (None, Some(hex)) => hex::decode(hex)
            .map_err(|e| TopologyError::Transcript(format!("invalid hex payload: {e}")))?,
        (None, None) => {
            return Err(TopologyError::Transcript(format!(
                "no result in output: {transcript:?}"
            )));
        }
    };

    if !record.ok {
        let message: Value = serde_json::from_slice(&payload)?;
        return Err(TopologyError::Remote(match message {
            Value::String(message) => message,
            other => other.to_string(),
        }));
    }

    Ok(serde_json::from_slice(&payload)?)
}

/// Renders a console transcript for a result, the way `tarantoolctl`
/// prints the wrapper's return value.
pub fn render_transcript(ok: bool, payload: &Value) -> String {
    format!(
        "---\n- ok: {}\n  res: {}\n...\n",
        ok,
        STANDARD.encode(payload.to_string())
    )
}

/// Quotes a string as a Lua double-quoted literal.
fn lua_quote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() && (c as u32) < 0x80 => {
                out.push_str(&format!("\\{:03}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
