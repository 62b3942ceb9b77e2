//! Shell-backed platform: every operation is a framed command line on the
//! channel, located in the output by random delimiters.

pub mod framer;
pub mod process;
pub mod stream;

use crate::catalog::{Capability, Catalog, ANY_STREAM};
use crate::channel::{Channel, Wire};
use crate::config::TransportConfig;
use crate::constants::{posix, timeouts};
use crate::errors::{TransportError, TransportErrorKind};
use crate::platform::{CompletedProcess, OpenMode, Platform, ProcessSpec, Redirect};
use crate::resolver::{BinaryLocator, MethodParams, Resolver};
use crate::services::logger::Logger;
use crate::utils::quote::quote;
use crate::utils::text::preview_bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

pub use framer::{DelimiterTriple, FramedCommand};
pub use process::PosixProcess;
pub use stream::{RemoteFile, RemoteReader, RemoteWriter, StdinEncoder};

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:link/ether|ether|hwaddr)\s+([0-9a-f]{2}(?::[0-9a-f]{2}){5})").unwrap()
});

/// A handle dropped before its exit-code marker was read.
#[derive(Debug, Clone)]
struct Abandoned {
    code: String,
    command: String,
    signalled: bool,
}

pub struct PosixPlatform {
    wire: Wire,
    config: TransportConfig,
    logger: Logger,
    resolver: Resolver,
    which_cache: HashMap<String, Option<String>>,
    has_pty: bool,
    interactive: bool,
    abandoned: Option<Abandoned>,
}

impl PosixPlatform {
    /// Switches the shell to non-interactive mode and probes for a PTY.
    pub fn connect(
        channel: Box<dyn Channel>,
        config: TransportConfig,
        logger: &Logger,
    ) -> Result<Self, TransportError> {
        let catalog = Arc::new(Catalog::for_config(&config)?);
        Self::with_catalog(channel, config, catalog, logger)
    }

    pub fn with_catalog(
        channel: Box<dyn Channel>,
        config: TransportConfig,
        catalog: Arc<Catalog>,
        logger: &Logger,
    ) -> Result<Self, TransportError> {
        let logger = logger.child("posix");
        let wire = Wire::new(channel, logger.clone());
        let resolver = Resolver::new(catalog, &logger);
        let assume_pty = config.assume_pty;
        let mut platform = Self {
            wire,
            config,
            logger,
            resolver,
            which_cache: HashMap::new(),
            has_pty: assume_pty,
            interactive: true,
            abandoned: None,
        };
        platform.set_interactive(false)?;
        if !assume_pty {
            platform.has_pty = platform.probe_pty()?;
        }
        platform.logger.info(
            "connected",
            Some(&serde_json::json!({
                "channel": platform.wire.describe(),
                "has_pty": platform.has_pty,
            })),
        );
        Ok(platform)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn has_pty(&self) -> bool {
        self.has_pty
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// True while an abandoned handle still owes its exit-code marker.
    pub fn is_desynchronized(&self) -> bool {
        self.abandoned.is_some()
    }

    fn probe_pty(&mut self) -> Result<bool, TransportError> {
        let mut process = self.popen(ProcessSpec::line(posix::PTY_PROBE))?;
        let code = process.wait(Some(Duration::from_millis(timeouts::PROBE_MS)))?;
        Ok(code == 0)
    }

    pub fn set_interactive(&mut self, interactive: bool) -> Result<(), TransportError> {
        if interactive == self.interactive {
            return Ok(());
        }
        let command = if interactive {
            posix::INTERACTIVE_STTY
        } else {
            posix::NONINTERACTIVE_STTY
        };
        self.logger.info(command.trim(), None);
        self.wire.sendline(command.as_bytes())?;
        self.interactive = interactive;
        Ok(())
    }

    /// Upgrades a raw shell to one running under a PTY. No-op when one exists.
    pub fn ensure_pty(&mut self) -> Result<(), TransportError> {
        if self.has_pty {
            return Ok(());
        }
        let command = if let Some(script) = self.which("script")? {
            format!(" exec {} -qc {} /dev/null 2>&1", quote(&script), posix::SHELL)
        } else if let Some(python) = self.which_any(posix::PYTHON_BINARIES)? {
            format!(
                " exec {} -c \"import pty; pty.spawn('{}')\" 2>&1",
                quote(&python),
                posix::SHELL
            )
        } else {
            return Err(TransportError::missing_binary("script")
                .with_hint("Neither script nor a python interpreter is available on the target."));
        };
        self.logger.info(command.trim(), None);
        self.wire.sendline(command.as_bytes())?;
        self.has_pty = true;
        if !self.interactive {
            // The new terminal starts with default line settings.
            self.interactive = true;
            self.set_interactive(false)?;
        }
        Ok(())
    }

    /// Searches for `code` left behind by an abandoned handle. A signalled
    /// command may never print it, so silence is accepted for those.
    fn reclaim_marker(
        &mut self,
        code: &str,
        signalled: bool,
        command: &str,
    ) -> Result<(), TransportError> {
        let timeout = self.config.reclaim_timeout;
        match self.wire.recv_until(code.as_bytes(), timeout) {
            Ok(_) => {
                self.wire.recv_line(timeout)?;
                self.logger.warn(
                    "reclaimed abandoned process",
                    Some(&serde_json::json!({ "command": command })),
                );
                Ok(())
            }
            Err(err) if err.is(TransportErrorKind::Timeout) && signalled => {
                let discarded = self.wire.drain(self.config.poll_interval)?;
                self.logger.warn(
                    "signalled process left no exit marker",
                    Some(&serde_json::json!({ "command": command, "discarded": discarded })),
                );
                Ok(())
            }
            Err(err) if err.is(TransportErrorKind::Timeout) => Err(TransportError::busy(
                "a previous process is still producing output on this channel",
            )
            .with_hint("Wait for it to finish, or call resync() to discard the channel state.")
            .with_details(serde_json::json!({ "command": command }))),
            Err(err) => Err(err),
        }
    }

    /// Drains any handle abandoned mid-flight. Fails with `Busy` if its
    /// command is still running after `reclaim_timeout`.
    pub fn reclaim(&mut self) -> Result<(), TransportError> {
        let Some(abandoned) = self.abandoned.take() else {
            return Ok(());
        };
        if let Err(err) =
            self.reclaim_marker(&abandoned.code, abandoned.signalled, &abandoned.command)
        {
            self.abandoned = Some(abandoned);
            return Err(err);
        }
        Ok(())
    }

    /// Forgets any abandoned handle and throws away buffered channel input.
    pub fn resync(&mut self) -> Result<usize, TransportError> {
        if let Some(abandoned) = self.abandoned.take() {
            self.logger.warn(
                "discarding abandoned process",
                Some(&serde_json::json!({ "command": abandoned.command })),
            );
        }
        self.wire.drain(self.config.poll_interval)
    }

    pub fn popen(&mut self, spec: ProcessSpec) -> Result<PosixProcess<'_>, TransportError> {
        if self.interactive {
            return Err(TransportError::invalid_params(
                "cannot start a framed process while the shell is interactive",
            ));
        }
        self.reclaim()?;

        let framed = framer::frame(&spec, self.config.delimiter_length)?;
        self.logger.info(
            "popen",
            Some(&serde_json::json!({
                "command": preview_bytes(framed.command.as_bytes(), crate::constants::limits::COMMAND_PREVIEW_BYTES),
            })),
        );
        self.wire.send(&framed.line)?;
        if let Some(input) = spec.bootstrap_input.as_deref() {
            self.wire.send(input)?;
        }

        let stdin_piped = spec.stdin == Redirect::Pipe;
        let stdout_piped = spec.stdout == Redirect::Pipe;
        Ok(PosixProcess::new(
            self,
            framed.command,
            framed.delimiters,
            stdin_piped,
            stdout_piped,
        ))
    }

    /// `popen` plus `communicate`. Stdout is captured unless redirected.
    /// The process is killed if `timeout` elapses.
    pub fn run(
        &mut self,
        mut spec: ProcessSpec,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError> {
        if spec.stdout == Redirect::Inherit {
            spec.stdout = Redirect::Pipe;
        }
        if input.is_some() {
            spec.stdin = Redirect::Pipe;
        }
        let args = spec.display();
        let mut process = self.popen(spec)?;
        let stdout = match process.communicate(input, timeout) {
            Ok(stdout) => stdout,
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
            stderr: Vec::new(),
        })
    }

    pub fn which(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        if let Some(cached) = self.which_cache.get(name) {
            return Ok(cached.clone());
        }
        let spec = ProcessSpec::argv(["which", name]).stderr(Redirect::Null);
        let result = self.run(spec, None, Some(self.config.recv_timeout))?;
        let path = if result.success() {
            result
                .stdout_text()
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

    /// First of `names` present on the target.
    pub fn which_any(&mut self, names: &[&str]) -> Result<Option<String>, TransportError> {
        for name in names {
            if let Some(path) = self.which(name)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub fn open(&mut self, path: &str, mode: &str) -> Result<RemoteFile<'_>, TransportError> {
        self.open_with(path, mode, MethodParams::new())
    }

    /// Opens `path` through the first catalog method that works on this target.
    pub fn open_with(
        &mut self,
        path: &str,
        mode: &str,
        params: MethodParams,
    ) -> Result<RemoteFile<'_>, TransportError> {
        let mode = OpenMode::parse(mode)?;
        let capability = if mode.write {
            Capability::Write
        } else {
            Capability::Read
        };
        let params = params.with_path(path);
        let resolver = self.resolver.clone();
        let method = resolver.resolve(capability, ANY_STREAM, &params, self)?;
        self.logger.debug(
            "open",
            Some(&serde_json::json!({
                "path": path,
                "mode": mode.as_agent_str(),
                "method": method.name,
            })),
        );

        let mut spec = ProcessSpec::line(method.command.clone())
            .shell(true)
            .stdin(Redirect::Pipe);
        if let Some(input) = method.input.clone() {
            spec = spec.bootstrap_input(input);
        }
        let exit = method.exit.clone();
        if mode.write {
            let process = self.popen(spec.stdout(Redirect::Null))?;
            Ok(RemoteFile::Writer(RemoteWriter::new(process, exit)))
        } else {
            let process = self.popen(spec.stdout(Redirect::Pipe))?;
            Ok(RemoteFile::Reader(RemoteReader::new(process, exit, path)))
        }
    }

    fn path_test(&mut self, flag: &str, path: &str) -> Result<bool, TransportError> {
        let done = self.run(
            ProcessSpec::argv(["test", flag, path]).stderr(Redirect::Null),
            None,
            Some(self.config.recv_timeout),
        )?;
        Ok(done.success())
    }

    /// Tells a missing or unreadable path apart from a reader that failed
    /// for another reason.
    pub(super) fn explain_read_failure(&mut self, path: &str, command: &str, code: i32) -> TransportError {
        let details = serde_json::json!({ "path": path, "command": command, "returncode": code });
        match self.path_test("-e", path) {
            Ok(false) => {
                return TransportError::not_found(format!("{}: no such file", path)).with_details(details)
            }
            Ok(true) => {}
            Err(err) => return err,
        }
        match self.path_test("-r", path) {
            Ok(false) => TransportError::access_denied(format!("{}: permission denied", path))
                .with_details(details),
            Ok(true) => TransportError::command_failed(code, command).with_details(details),
            Err(err) => err,
        }
    }

    /// Starts a shell through the catalog and returns the bytes that leave it.
    pub fn enter_shell(&mut self, params: MethodParams) -> Result<Option<Vec<u8>>, TransportError> {
        if self.interactive {
            return Err(TransportError::invalid_params(
                "cannot switch shells while the shell is interactive",
            ));
        }
        self.reclaim()?;
        let resolver = self.resolver.clone();
        let method = resolver.resolve(Capability::Shell, ANY_STREAM, &params, self)?;
        self.logger.info(
            "entering shell",
            Some(&serde_json::json!({ "method": method.name, "command": method.command })),
        );
        self.wire.sendline(format!(" {}", method.command).as_bytes())?;
        if let Some(input) = method.input.as_deref() {
            self.wire.send(input)?;
        }
        // The new shell has its own terminal settings and binary search path.
        self.which_cache.clear();
        self.interactive = true;
        self.set_interactive(false)?;
        Ok(method.exit)
    }

    /// SHA-256 over the fully qualified hostname and the first non-zero MAC.
    pub fn host_hash(&mut self) -> Result<String, TransportError> {
        let hostname = match self.run(
            ProcessSpec::line("hostname -f").shell(true).stderr(Redirect::Null),
            None,
            Some(self.config.recv_timeout),
        ) {
            Ok(done) if done.success() => done.stdout_text().trim().to_string(),
            Ok(_) => self.wire.describe(),
            Err(err) if err.is(TransportErrorKind::CommandFailed) => self.wire.describe(),
            Err(err) => return Err(err),
        };

        let mut mac: Option<String> = None;
        for command in ["ip link show", "ifconfig -a"] {
            let done = self.run(
                ProcessSpec::line(command).shell(true).stderr(Redirect::Null),
                None,
                Some(self.config.recv_timeout),
            )?;
            if !done.success() {
                continue;
            }
            let text = done.stdout_text().to_lowercase();
            mac = MAC_RE
                .captures_iter(&text)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                .find(|addr| addr != "00:00:00:00:00:00");
            if mac.is_some() {
                break;
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(hostname.as_bytes());
        hasher.update(mac.unwrap_or_default().as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl BinaryLocator for PosixPlatform {
    fn locate(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        self.which(name)
    }
}

impl Platform for PosixPlatform {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn run(
        &mut self,
        spec: ProcessSpec,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError> {
        PosixPlatform::run(self, spec, input, timeout)
    }

    fn which(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        PosixPlatform::which(self, name)
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
        PosixPlatform::host_hash(self)
    }
}
