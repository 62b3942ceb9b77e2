use super::framer::DelimiterTriple;
use super::stream::StdinEncoder;
use super::{Abandoned, PosixPlatform};
use crate::channel::BoundedReader;
use crate::constants::{control, return_codes};
use crate::errors::TransportError;
use std::time::{Duration, Instant};

/// One framed invocation. Holds the platform mutably, so no other command
/// can be issued on the channel until this is dropped.
pub struct PosixProcess<'p> {
    platform: &'p mut PosixPlatform,
    command: String,
    delimiters: DelimiterTriple,
    reader: BoundedReader,
    stdin: StdinEncoder,
    returncode: Option<i32>,
    stdin_piped: bool,
    stdout_piped: bool,
    stdin_closed: bool,
    code_consumed: bool,
    signalled: bool,
    broken: bool,
}

impl<'p> PosixProcess<'p> {
    pub(super) fn new(
        platform: &'p mut PosixPlatform,
        command: String,
        delimiters: DelimiterTriple,
        stdin_piped: bool,
        stdout_piped: bool,
    ) -> Self {
        let reader = BoundedReader::new(delimiters.start.as_bytes(), delimiters.end.as_bytes());
        let stdin = StdinEncoder::new(platform.has_pty, &platform.config);
        Self {
            platform,
            command,
            delimiters,
            reader,
            stdin,
            returncode: None,
            stdin_piped,
            stdout_piped,
            stdin_closed: false,
            code_consumed: false,
            signalled: false,
            broken: false,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    pub fn delimiters(&self) -> &DelimiterTriple {
        &self.delimiters
    }

    pub(super) fn recv_timeout(&self) -> Duration {
        self.platform.config.recv_timeout
    }

    pub(super) fn reader_close_timeout(&self) -> Duration {
        self.platform.config.reader_close_timeout
    }

    pub(super) fn writer_close_timeout(&self) -> Duration {
        self.platform.config.writer_close_timeout
    }

    /// Reads whatever arrives within `timeout`, then anything already queued.
    fn pump(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let wire = &mut self.platform.wire;
        let got = self.reader.pump(wire, timeout)?;
        if got {
            while !self.reader.is_ended() && self.reader.pump(wire, Duration::ZERO)? {}
        }
        if !self.stdout_piped {
            self.reader.take_all();
        }
        Ok(got)
    }

    fn receive_returncode(&mut self) -> Result<(), TransportError> {
        let timeout = self.platform.config.recv_timeout;
        let token = self.delimiters.code.as_bytes();
        let wire = &mut self.platform.wire;
        let data = wire.recv_until(token, timeout)?;
        wire.recv_line(timeout)?;
        self.code_consumed = true;

        let status = String::from_utf8_lossy(&data[..data.len() - token.len()]);
        let status = status.trim();
        match status.parse::<i32>() {
            Ok(code) => {
                self.returncode = Some(code);
                self.platform.logger.debug(
                    "process exited",
                    Some(&serde_json::json!({ "command": self.command, "returncode": code })),
                );
                Ok(())
            }
            Err(_) => {
                self.broken = true;
                Err(TransportError::protocol(format!(
                    "unparsable exit status {:?}",
                    status
                ))
                .with_details(serde_json::json!({ "command": self.command })))
            }
        }
    }

    fn ensure_usable(&self) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::protocol(
                "process handle abandoned after a framing error",
            ));
        }
        Ok(())
    }

    /// Non-blocking. Completes once the end marker was seen and all piped
    /// output was taken.
    pub fn poll(&mut self) -> Result<Option<i32>, TransportError> {
        if let Some(code) = self.returncode {
            return Ok(Some(code));
        }
        self.ensure_usable()?;
        self.pump(Duration::ZERO)?;
        if self.reader.is_ended() && self.reader.buffered() == 0 {
            self.receive_returncode()?;
        }
        Ok(self.returncode)
    }

    /// Blocks until exit. Output nobody read yet is discarded.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<i32, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(code) = self.poll()? {
                return Ok(code);
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(TransportError::timeout(format!(
                    "process did not exit in time: {}",
                    self.command
                )));
            }
            self.reader.take_all();
            self.pump(self.platform.config.poll_interval)?;
        }
    }

    /// Writes `input` (followed by EOF) and collects stdout until exit.
    /// There is no separate stderr stream on a shared channel.
    pub fn communicate(
        &mut self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut output = self.reader.take_all();
        if self.returncode.is_some() {
            return Ok(output);
        }
        if let Some(input) = input {
            self.write_stdin(input)?;
            self.close_stdin()?;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            output.extend(self.reader.take_all());
            if self.poll()?.is_some() {
                break;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(TransportError::timeout(format!(
                    "process did not exit in time: {}",
                    self.command
                ))
                .with_details(serde_json::json!({ "collected": output.len() })));
            }
            self.pump(self.platform.config.poll_interval)?;
        }
        output.extend(self.reader.take_all());
        Ok(output)
    }

    /// Reads piped stdout. `Ok(0)` means the command finished.
    pub fn read_stdout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if !self.stdout_piped {
            return Err(TransportError::invalid_params("stdout is not piped"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.reader.buffered() > 0 {
                let chunk = self.reader.take(buf.len());
                buf[..chunk.len()].copy_from_slice(&chunk);
                return Ok(chunk.len());
            }
            if self.returncode.is_some() {
                return Ok(0);
            }
            if self.reader.is_ended() {
                self.poll()?;
                return Ok(0);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::timeout(format!(
                    "no output from process: {}",
                    self.command
                )));
            }
            let slice = self.platform.config.poll_interval.min(deadline - now);
            self.ensure_usable()?;
            self.pump(slice)?;
        }
    }

    /// Sends bytes to the process stdin, escaped for the terminal if needed.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.stdin_piped {
            return Err(TransportError::invalid_params("stdin is not piped"));
        }
        if self.stdin_closed {
            return Err(TransportError::invalid_params("stdin already closed"));
        }
        let encoded = self.stdin.encode(data);
        self.platform.wire.send(&encoded)
    }

    /// Signals end of input with `^D`; twice when the last line is unterminated.
    pub fn close_stdin(&mut self) -> Result<(), TransportError> {
        if !self.stdin_piped || self.stdin_closed {
            return Ok(());
        }
        self.stdin_closed = true;
        let eof = self.stdin.eof_sequence();
        self.platform.wire.send(&eof)
    }

    /// Explains a reader on `path` that ran to completion with a non-zero
    /// status. `None` for success, a signal, or a process still running.
    pub(super) fn read_failure(&mut self, path: &str) -> Option<TransportError> {
        match self.returncode {
            Some(code) if code != 0 && !self.signalled => {
                Some(self.platform.explain_read_failure(path, &self.command, code))
            }
            _ => None,
        }
    }

    pub(super) fn send_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.platform.wire.send(data)
    }

    fn signal(&mut self, sequence: &[u8], label: &str) -> Result<(), TransportError> {
        if self.returncode.is_some() {
            return Ok(());
        }
        self.platform.logger.warn(
            label,
            Some(&serde_json::json!({ "command": self.command })),
        );
        self.platform.wire.send(sequence)?;
        self.returncode = Some(return_codes::SIGNALLED);
        self.signalled = true;
        Ok(())
    }

    /// Two `^C`. Best effort: the remote process may survive.
    pub fn kill(&mut self) -> Result<(), TransportError> {
        self.signal(control::KILL_SEQUENCE, "kill")
    }

    /// Two `^\`. Best effort: the remote process may survive.
    pub fn terminate(&mut self) -> Result<(), TransportError> {
        self.signal(control::TERMINATE_SEQUENCE, "terminate")
    }

    /// Consumes the exit-code marker now instead of leaving it for the next
    /// `popen`.
    pub fn detach(mut self) -> Result<(), TransportError> {
        if self.code_consumed {
            return Ok(());
        }
        let code = self.delimiters.code.clone();
        let command = self.command.clone();
        let signalled = self.signalled;
        self.code_consumed = true;
        if let Err(err) = self.platform.reclaim_marker(&code, signalled, &command) {
            self.platform.abandoned = Some(Abandoned {
                code,
                command,
                signalled,
            });
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for PosixProcess<'_> {
    fn drop(&mut self) {
        if self.code_consumed {
            return;
        }
        self.platform.logger.debug(
            "process dropped before exit marker",
            Some(&serde_json::json!({ "command": self.command, "signalled": self.signalled })),
        );
        self.platform.abandoned = Some(Abandoned {
            code: self.delimiters.code.clone(),
            command: self.command.clone(),
            signalled: self.signalled,
        });
    }
}
