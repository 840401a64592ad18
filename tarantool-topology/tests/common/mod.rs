//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use serde_json::Value;
use std::sync::Mutex;
use tarantool_topology::codec;
use tarantool_topology::{Result, Transport};

/// A recorded exec call.
#[derive(Debug, Clone)]
pub struct Call {
    pub pod: String,
    pub script: String,
    pub args: Vec<Value>,
}

type Responder = Box<dyn Fn(&str, &[Value]) -> Result<Value> + Send + Sync>;

/// Transport answering every call with a closure and recording the calls.
pub struct ScriptedTransport {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&str, &[Value]) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same value.
    pub fn replying(value: Value) -> Self {
        Self::new(move |_, _| Ok(value.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exec(&self, pod: &Pod, script: &str, args: &[Value]) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            pod: pod.metadata.name.clone().unwrap_or_default(),
            script: script.to_string(),
            args: args.to_vec(),
        });
        (self.responder)(script, args)
    }
}

/// Transport that runs the real codec against a console which echoes the
/// decoded arguments back.
pub struct EchoConsole;

#[async_trait]
impl Transport for EchoConsole {
    async fn exec(&self, _pod: &Pod, script: &str, args: &[Value]) -> Result<Value> {
        let command = codec::encode(script, args)?;
        let decoded = console_args(&command.stdin);
        codec::decode(&codec::render_transcript(true, &decoded))
    }
}

/// Reads back the arguments the wrapper chunk would decode.
pub fn console_args(chunk: &str) -> Value {
    let start = chunk.find("json.decode(").expect("args literal") + "json.decode(".len();
    let rest = &chunk[start..];
    if rest.starts_with("'{}'") {
        return Value::Array(vec![]);
    }
    let literal = lua_unquote(rest);
    serde_json::from_str(&literal).expect("args are json")
}

/// Parses a Lua double-quoted literal at the start of `input`.
pub fn lua_unquote(input: &str) -> String {
    let mut chars = input.chars();
    assert_eq!(chars.next(), Some('"'));
    let mut out = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return out,
            '\\' => match chars.next().expect("escape") {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                d if d.is_ascii_digit() => {
                    let mut code = d.to_digit(10).unwrap();
                    for _ in 0..2 {
                        let next = chars.next().expect("decimal escape");
                        code = code * 10 + next.to_digit(10).expect("digit");
                    }
                    out.push(char::from_u32(code).expect("char"));
                }
                other => out.push(other),
            },
            c => out.push(c),
        }
    }
    panic!("unterminated literal");
}

pub fn pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("tarantool".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}
