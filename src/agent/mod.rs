//! Platform backed by a resident agent that exposes files and processes as
//! integer handles.

pub mod bootstrap;
pub mod file;
pub mod process;
pub mod protocol;

use crate::channel::{Channel, Wire};
use crate::config::TransportConfig;
use crate::constants::agent;
use crate::errors::{TransportError, TransportErrorKind};
use crate::platform::{Argv, CompletedProcess, OpenMode, Platform, ProcessSpec, Redirect};
use crate::services::logger::Logger;
use crate::utils::quote::join_windows;
use protocol::{Handle, Request, ScriptLine};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::time::Duration;

pub use bootstrap::{BootstrapPlan, BootstrapReport};
pub use file::AgentFile;
pub use process::AgentProcess;

pub struct AgentPlatform {
    wire: Wire,
    config: TransportConfig,
    logger: Logger,
    open_handles: HashSet<Handle>,
    which_cache: HashMap<String, Option<String>>,
    host_id: Option<String>,
}

impl AgentPlatform {
    /// Wraps a channel on which the agent is already answering requests.
    pub fn connect(channel: Box<dyn Channel>, config: TransportConfig, logger: &Logger) -> Self {
        let logger = logger.child("agent");
        let wire = Wire::new(channel, logger.clone());
        Self {
            wire,
            config,
            logger,
            open_handles: HashSet::new(),
            which_cache: HashMap::new(),
            host_id: None,
        }
    }

    /// Delivers the loader over a command prompt, then talks to the agent.
    pub fn bootstrap(
        channel: Box<dyn Channel>,
        config: TransportConfig,
        plan: &BootstrapPlan,
        logger: &Logger,
    ) -> Result<(Self, BootstrapReport), TransportError> {
        let mut platform = Self::connect(channel, config, logger);
        let report = bootstrap::deliver(
            &mut platform.wire,
            plan,
            platform.config.recv_timeout,
            &platform.logger,
        )?;
        platform.host_id = report.host_id.clone();
        Ok((platform, report))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn open_handle_count(&self) -> usize {
        self.open_handles.len()
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.open_handles.contains(&handle)
    }

    fn send(&mut self, request: &Request) -> Result<(), TransportError> {
        self.logger.debug(
            "request",
            Some(&serde_json::json!({
                "resource": request.resource(),
                "method": request.method(),
            })),
        );
        let bytes = request.encode()?;
        self.wire.send(&bytes)
    }

    fn recv_token(&mut self) -> Result<String, TransportError> {
        let line = self.wire.recv_line(self.config.recv_timeout)?;
        Ok(protocol::line_token(&line))
    }

    fn track(&mut self, handle: Handle) -> Result<(), TransportError> {
        if !self.open_handles.insert(handle) {
            return Err(TransportError::protocol(format!(
                "agent returned handle {} which is already open",
                handle
            )));
        }
        Ok(())
    }

    /// Tracks every handle of one reply. When one is refused, the ones
    /// tracked so far are closed and the rest are released untracked.
    fn track_all(&mut self, handles: &[Handle]) -> Result<(), TransportError> {
        for (idx, &handle) in handles.iter().enumerate() {
            let Err(err) = self.track(handle) else {
                continue;
            };
            for &tracked in &handles[..idx] {
                if let Err(close_err) = self.close_handle(tracked) {
                    self.logger.warn(
                        "failed to release handle",
                        Some(&serde_json::json!({ "handle": tracked, "error": close_err.message })),
                    );
                }
            }
            for &rest in &handles[idx + 1..] {
                if self.open_handles.contains(&rest) {
                    continue;
                }
                if let Err(close_err) = self.send(&Request::FileClose { handle: rest }) {
                    self.logger.warn(
                        "failed to release handle",
                        Some(&serde_json::json!({ "handle": rest, "error": close_err.message })),
                    );
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Sends `File close` unless the handle was already closed.
    pub(crate) fn close_handle(&mut self, handle: Handle) -> Result<(), TransportError> {
        if !self.open_handles.remove(&handle) {
            return Ok(());
        }
        self.send(&Request::FileClose { handle })
    }

    /// Reads up to `buf.len()` bytes; `Ok(0)` is end of file.
    pub(crate) fn read_handle(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.open_handles.contains(&handle) {
            return Err(TransportError::invalid_params(format!(
                "handle {} is not open",
                handle
            )));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.send(&Request::FileRead {
            handle,
            count: buf.len(),
        })?;
        let count = protocol::parse_count(&self.recv_token()?)?;
        if count > buf.len() {
            return Err(TransportError::protocol(format!(
                "agent returned {} bytes for a {} byte read",
                count,
                buf.len()
            )));
        }
        if count == 0 {
            return Ok(0);
        }
        let data = self.wire.recv_exact(count, self.config.recv_timeout)?;
        buf[..count].copy_from_slice(&data);
        Ok(count)
    }

    /// Writes all of `data` in compressed chunks.
    pub(crate) fn write_handle(&mut self, handle: Handle, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open_handles.contains(&handle) {
            return Err(TransportError::invalid_params(format!(
                "handle {} is not open",
                handle
            )));
        }
        let mut written = 0usize;
        while written < data.len() {
            let end = (written + self.config.agent_write_chunk).min(data.len());
            let payload = protocol::encode_payload(&data[written..end])?;
            self.send(&Request::FileWrite { handle, payload })?;
            let accepted = protocol::parse_count(&self.recv_token()?)?;
            if accepted == 0 || accepted > end - written {
                return Err(TransportError::protocol(format!(
                    "agent accepted {} of {} bytes",
                    accepted,
                    end - written
                )));
            }
            written += accepted;
        }
        Ok(written)
    }

    pub fn open(&mut self, path: &str, mode: &str) -> Result<AgentFile<'_>, TransportError> {
        let mode = OpenMode::parse(mode)?;
        self.send(&Request::FileOpen {
            path: path.to_string(),
            mode: mode.as_agent_str().to_string(),
        })?;
        let handle = protocol::parse_open_reply(&self.recv_token()?, path)?;
        self.track(handle)?;
        self.logger.debug(
            "opened",
            Some(&serde_json::json!({ "path": path, "handle": handle })),
        );
        Ok(AgentFile::new(self, handle, mode))
    }

    fn cmdline(spec: &ProcessSpec) -> Result<String, TransportError> {
        if spec.cwd.is_some() || !spec.env.is_empty() {
            return Err(TransportError::invalid_params(
                "the agent does not support cwd or environment overrides",
            ));
        }
        let command = match &spec.args {
            Argv::Line(line) if !line.trim().is_empty() => line.clone(),
            Argv::List(list) if !list.is_empty() => join_windows(list),
            _ => return Err(TransportError::invalid_params("empty command")),
        };
        if !spec.shell {
            return Ok(command);
        }
        let mut argv: Vec<&str> = agent::SHELL_PREFIX.to_vec();
        argv.push(command.as_str());
        Ok(join_windows(&argv))
    }

    pub fn popen(&mut self, spec: ProcessSpec) -> Result<AgentProcess<'_>, TransportError> {
        for redirect in [&spec.stdin, &spec.stdout, &spec.stderr] {
            if let Redirect::Path(path) = redirect {
                return Err(TransportError::invalid_params(format!(
                    "the agent cannot redirect to {}",
                    path
                )));
            }
        }
        let cmdline = Self::cmdline(&spec)?;
        self.logger.info(
            "popen",
            Some(&serde_json::json!({ "cmdline": cmdline })),
        );
        self.send(&Request::ProcessStart {
            cmdline: cmdline.clone(),
        })?;
        let process = protocol::parse_start_reply(&self.recv_token()?, &cmdline)?;
        let mut stdio = [0 as Handle; 3];
        for slot in stdio.iter_mut() {
            *slot = protocol::parse_handle(&self.recv_token()?)?;
        }
        self.track_all(&[process, stdio[0], stdio[1], stdio[2]])?;

        let mut keep = |redirect: &Redirect, handle: Handle| -> Result<Option<Handle>, TransportError> {
            if *redirect == Redirect::Pipe {
                Ok(Some(handle))
            } else {
                self.close_handle(handle)?;
                Ok(None)
            }
        };
        let stdin_piped = spec.stdin == Redirect::Pipe || spec.bootstrap_input.is_some();
        let stdin = if stdin_piped {
            Some(stdio[0])
        } else {
            keep(&spec.stdin, stdio[0])?
        };
        let stdout = keep(&spec.stdout, stdio[1])?;
        let stderr = keep(&spec.stderr, stdio[2])?;

        if let (Some(input), Some(handle)) = (spec.bootstrap_input.as_deref(), stdin) {
            self.write_handle(handle, input)?;
        }
        Ok(AgentProcess::new(self, cmdline, process, stdin, stdout, stderr))
    }

    pub fn run(
        &mut self,
        mut spec: ProcessSpec,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError> {
        if spec.stdout == Redirect::Inherit {
            spec.stdout = Redirect::Pipe;
        }
        if spec.stderr == Redirect::Inherit {
            spec.stderr = Redirect::Pipe;
        }
        if input.is_some() {
            spec.stdin = Redirect::Pipe;
        }
        let mut process = self.popen(spec)?;
        let args = process.cmdline().to_string();
        let (stdout, stderr) = match process.communicate(input, timeout) {
            Ok(output) => output,
            Err(err) => {
                if err.is(TransportErrorKind::Timeout) {
                    process.kill()?;
                }
                return Err(err);
            }
        };
        let returncode = process.wait(timeout)?;
        Ok(CompletedProcess {
            args,
            returncode,
            stdout,
            stderr,
        })
    }

    /// Runs a script inside the agent; each result object arrives as a JSON line.
    pub fn run_script(&mut self, script: &str, depth: u32) -> Result<Vec<serde_json::Value>, TransportError> {
        let payload = protocol::encode_payload(script.as_bytes())?;
        self.send(&Request::PowerShellRun { payload, depth })?;
        let mut results = Vec::new();
        loop {
            match protocol::parse_script_line(&self.recv_token()?)? {
                ScriptLine::End => return Ok(results),
                ScriptLine::Value(value) => results.push(value),
            }
        }
    }

    pub fn which(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        if let Some(cached) = self.which_cache.get(name) {
            return Ok(cached.clone());
        }
        let done = self.run(
            ProcessSpec::argv([agent::WHICH_COMMAND, name]),
            None,
            Some(self.config.recv_timeout),
        )?;
        let path = if done.success() {
            done.stdout_text()
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        } else {
            None
        };
        self.which_cache.insert(name.to_string(), path.clone());
        Ok(path)
    }
}

impl Platform for AgentPlatform {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn run(
        &mut self,
        spec: ProcessSpec,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError> {
        AgentPlatform::run(self, spec, input, timeout)
    }

    fn which(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        AgentPlatform::which(self, name)
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransportError> {
        let mut file = self.open(path, "rb")?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        file.close()?;
        Ok(data)
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), TransportError> {
        let mut file = self.open(path, "wb")?;
        file.write_all(data)?;
        file.close()
    }

    fn host_hash(&mut self) -> Result<String, TransportError> {
        self.host_id
            .clone()
            .ok_or_else(|| TransportError::not_found("agent did not report a host identifier"))
    }
}
