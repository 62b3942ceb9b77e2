use super::protocol::{self, Handle, PollStatus, Request};
use super::AgentPlatform;
use crate::constants::{limits, return_codes};
use crate::errors::TransportError;
use std::time::{Duration, Instant};

/// A process started by the agent, with whichever stdio handles were piped.
pub struct AgentProcess<'a> {
    platform: &'a mut AgentPlatform,
    cmdline: String,
    handle: Handle,
    stdin: Option<Handle>,
    stdout: Option<Handle>,
    stderr: Option<Handle>,
    returncode: Option<i32>,
}

impl<'a> AgentProcess<'a> {
    pub(super) fn new(
        platform: &'a mut AgentPlatform,
        cmdline: String,
        handle: Handle,
        stdin: Option<Handle>,
        stdout: Option<Handle>,
        stderr: Option<Handle>,
    ) -> Self {
        Self {
            platform,
            cmdline,
            handle,
            stdin,
            stdout,
            stderr,
            returncode: None,
        }
    }

    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    pub fn poll(&mut self) -> Result<Option<i32>, TransportError> {
        if let Some(code) = self.returncode {
            return Ok(Some(code));
        }
        self.platform.send(&Request::ProcessPoll {
            handle: self.handle,
        })?;
        let token = self.platform.recv_token()?;
        match protocol::parse_poll_reply(&token, self.handle)? {
            PollStatus::Running => Ok(None),
            PollStatus::Exited(code) => {
                self.returncode = Some(code);
                Ok(Some(code))
            }
        }
    }

    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<i32, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(code) = self.poll()? {
                self.cleanup()?;
                return Ok(code);
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(TransportError::timeout(format!(
                    "process did not exit in time: {}",
                    self.cmdline
                )));
            }
            std::thread::sleep(self.platform.config.poll_interval);
        }
    }

    pub fn write_stdin(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let handle = self
            .stdin
            .ok_or_else(|| TransportError::invalid_params("stdin is not piped"))?;
        self.platform.write_handle(handle, data)
    }

    pub fn close_stdin(&mut self) -> Result<(), TransportError> {
        match self.stdin.take() {
            Some(handle) => self.platform.close_handle(handle),
            None => Ok(()),
        }
    }

    fn read_into(&mut self, handle: Option<Handle>, out: &mut Vec<u8>) -> Result<usize, TransportError> {
        let Some(handle) = handle else {
            return Ok(0);
        };
        let mut buf = vec![0u8; limits::READ_CHUNK];
        let count = self.platform.read_handle(handle, &mut buf)?;
        out.extend_from_slice(&buf[..count]);
        Ok(count)
    }

    /// Writes `input`, closes stdin and collects `(stdout, stderr)` until exit.
    pub fn communicate(
        &mut self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if self.returncode.is_some() {
            return Ok((stdout, stderr));
        }
        if let Some(input) = input {
            self.write_stdin(input)?;
        }
        self.close_stdin()?;

        let deadline = timeout.map(|t| Instant::now() + t);
        while self.poll()?.is_none() {
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(TransportError::timeout(format!(
                    "process did not exit in time: {}",
                    self.cmdline
                ))
                .with_details(serde_json::json!({ "collected": stdout.len() })));
            }
            let got = self.read_into(self.stdout, &mut stdout)?;
            if got == 0 {
                std::thread::sleep(self.platform.config.poll_interval);
            }
        }
        while self.read_into(self.stdout, &mut stdout)? > 0 {}
        while self.read_into(self.stderr, &mut stderr)? > 0 {}
        self.cleanup()?;
        Ok((stdout, stderr))
    }

    pub fn kill(&mut self) -> Result<(), TransportError> {
        self.terminate()
    }

    pub fn terminate(&mut self) -> Result<(), TransportError> {
        if self.returncode.is_some() {
            return Ok(());
        }
        self.platform.logger.warn(
            "terminate",
            Some(&serde_json::json!({ "cmdline": self.cmdline, "handle": self.handle })),
        );
        self.platform.send(&Request::ProcessKill {
            handle: self.handle,
            code: 0,
        })?;
        self.returncode = Some(return_codes::SIGNALLED);
        Ok(())
    }

    /// Closes the stdio handles and the process handle itself.
    pub fn cleanup(&mut self) -> Result<(), TransportError> {
        let handles = [
            self.stdin.take(),
            self.stdout.take(),
            self.stderr.take(),
            Some(self.handle),
        ];
        for handle in handles.into_iter().flatten() {
            self.platform.close_handle(handle)?;
        }
        Ok(())
    }
}

impl Drop for AgentProcess<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.cleanup() {
            self.platform.logger.warn(
                "failed to release process handles",
                Some(&serde_json::json!({ "handle": self.handle, "error": err.message })),
            );
        }
    }
}
