//! Wire format of the reflective agent: a resource line, a method line and
//! argument lines per request; line tokens (and raw bytes for reads) back.

use crate::constants::agent;
use crate::errors::TransportError;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub type Handle = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    FileOpen { path: String, mode: String },
    FileRead { handle: Handle, count: usize },
    FileWrite { handle: Handle, payload: String },
    FileClose { handle: Handle },
    ProcessStart { cmdline: String },
    ProcessPoll { handle: Handle },
    ProcessKill { handle: Handle, code: i32 },
    PowerShellRun { payload: String, depth: u32 },
}

impl Request {
    pub fn resource(&self) -> &'static str {
        match self {
            Request::FileOpen { .. }
            | Request::FileRead { .. }
            | Request::FileWrite { .. }
            | Request::FileClose { .. } => "File",
            Request::ProcessStart { .. }
            | Request::ProcessPoll { .. }
            | Request::ProcessKill { .. } => "Process",
            Request::PowerShellRun { .. } => "PowerShell",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Request::FileOpen { .. } => "open",
            Request::FileRead { .. } => "read",
            Request::FileWrite { .. } => "write",
            Request::FileClose { .. } => "close",
            Request::ProcessStart { .. } => "start",
            Request::ProcessPoll { .. } => "poll",
            Request::ProcessKill { .. } => "kill",
            Request::PowerShellRun { .. } => "run",
        }
    }

    fn arguments(&self) -> Vec<String> {
        match self {
            Request::FileOpen { path, mode } => vec![path.clone(), mode.clone()],
            Request::FileRead { handle, count } => vec![handle.to_string(), count.to_string()],
            Request::FileWrite { handle, payload } => vec![handle.to_string(), payload.clone()],
            Request::FileClose { handle } | Request::ProcessPoll { handle } => {
                vec![handle.to_string()]
            }
            Request::ProcessStart { cmdline } => vec![cmdline.clone()],
            Request::ProcessKill { handle, code } => vec![handle.to_string(), code.to_string()],
            Request::PowerShellRun { payload, depth } => vec![payload.clone(), depth.to_string()],
        }
    }

    /// The whole request as one buffer so it goes out in a single send.
    /// Arguments are one line each, so a line break inside one is refused.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let arguments = self.arguments();
        if let Some(arg) = arguments.iter().find(|arg| arg.contains(['\n', '\r'])) {
            return Err(TransportError::invalid_params(format!(
                "{} {} argument contains a line break",
                self.resource(),
                self.method()
            ))
            .with_details(serde_json::json!({ "argument": arg })));
        }
        let mut out = format!("{}\n{}\n", self.resource(), self.method());
        for arg in arguments {
            out.push_str(&arg);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

/// gzip then base64, the encoding used for file writes, scripts and stage two.
pub fn encode_payload(data: &[u8]) -> Result<String, TransportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

pub fn decode_payload(text: &str) -> Result<Vec<u8>, TransportError> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|err| TransportError::protocol(format!("invalid base64 payload: {}", err)))?;
    let mut out = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(|err| TransportError::protocol(format!("invalid gzip payload: {}", err)))?;
    Ok(out)
}

pub fn line_token(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Reply to `File open`.
pub fn parse_open_reply(token: &str, path: &str) -> Result<Handle, TransportError> {
    if let Ok(handle) = token.parse::<Handle>() {
        return Ok(handle);
    }
    let details = serde_json::json!({ "path": path, "reply": token });
    match token {
        agent::NOT_FOUND => Err(TransportError::not_found(format!("{}: no such file", path))
            .with_details(details)),
        agent::DENIED => Err(TransportError::access_denied(format!(
            "{}: permission denied",
            path
        ))
        .with_details(details)),
        other if other.starts_with("E:") => Err(TransportError::internal(format!(
            "{}: agent refused to open ({})",
            path, other
        ))
        .with_details(details)),
        _ => Err(TransportError::protocol(format!(
            "unexpected reply to open: {:?}",
            token
        ))
        .with_details(details)),
    }
}

/// First line of the reply to `Process start`.
pub fn parse_start_reply(token: &str, cmdline: &str) -> Result<Handle, TransportError> {
    if let Ok(handle) = token.parse::<Handle>() {
        return Ok(handle);
    }
    let details = serde_json::json!({ "cmdline": cmdline, "reply": token });
    match token {
        agent::PROCESS_NOT_FOUND => Err(TransportError::not_found(
            "executable or command not found",
        )
        .with_details(details)),
        "E:IN" | "E:OUT" | "E:ERR" => Err(TransportError::internal(format!(
            "agent failed to create a stdio pipe ({})",
            token
        ))
        .with_details(details)),
        _ => Err(TransportError::protocol(format!(
            "unexpected reply to process start: {:?}",
            token
        ))
        .with_details(details)),
    }
}

pub fn parse_handle(token: &str) -> Result<Handle, TransportError> {
    token
        .parse::<Handle>()
        .map_err(|_| TransportError::protocol(format!("expected a handle, got {:?}", token)))
}

/// Byte counts in read and write replies.
pub fn parse_count(token: &str) -> Result<usize, TransportError> {
    token
        .parse::<usize>()
        .map_err(|_| TransportError::protocol(format!("expected a byte count, got {:?}", token)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited(i32),
}

pub fn parse_poll_reply(token: &str, handle: Handle) -> Result<PollStatus, TransportError> {
    match token {
        agent::RUNNING => Ok(PollStatus::Running),
        agent::POLL_ERROR => Err(TransportError::internal(format!(
            "process {}: failed to get exit status",
            handle
        ))),
        other => other.parse::<i32>().map(PollStatus::Exited).map_err(|_| {
            TransportError::protocol(format!("unexpected reply to poll: {:?}", other))
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLine {
    Value(serde_json::Value),
    End,
}

pub fn parse_script_line(token: &str) -> Result<ScriptLine, TransportError> {
    if token == agent::SCRIPT_END {
        return Ok(ScriptLine::End);
    }
    if let Some(message) = token.strip_prefix(agent::SCRIPT_EXCEPTION) {
        return Err(TransportError::new(
            crate::errors::TransportErrorKind::CommandFailed,
            "AGENT_EXCEPTION",
            message.to_string(),
        ));
    }
    if let Some(message) = token.strip_prefix(agent::SCRIPT_ERROR) {
        return Err(TransportError::new(
            crate::errors::TransportErrorKind::CommandFailed,
            "SCRIPT_ERROR",
            message.to_string(),
        ));
    }
    serde_json::from_str(token)
        .map(ScriptLine::Value)
        .map_err(|err| TransportError::protocol(format!("invalid script result line: {}", err)))
}
