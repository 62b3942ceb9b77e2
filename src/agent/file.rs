use super::protocol::Handle;
use super::AgentPlatform;
use crate::errors::TransportError;
use crate::platform::OpenMode;
use std::io;

/// Remote file handle. Closed exactly once, on `close` or drop.
pub struct AgentFile<'a> {
    platform: &'a mut AgentPlatform,
    handle: Handle,
    mode: OpenMode,
    eof: bool,
}

impl<'a> AgentFile<'a> {
    pub(super) fn new(platform: &'a mut AgentPlatform, handle: Handle, mode: OpenMode) -> Self {
        Self {
            platform,
            handle,
            mode,
            eof: false,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn close(mut self) -> Result<(), TransportError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), TransportError> {
        self.platform.close_handle(self.handle)
    }
}

impl io::Read for AgentFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode.write {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for writing",
            ));
        }
        if self.eof {
            return Ok(0);
        }
        let count = self.platform.read_handle(self.handle, buf)?;
        if count == 0 && !buf.is_empty() {
            self.eof = true;
        }
        Ok(count)
    }
}

impl io::Write for AgentFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.write {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for reading",
            ));
        }
        Ok(self.platform.write_handle(self.handle, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for AgentFile<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close_inner() {
            self.platform.logger.warn(
                "failed to close handle",
                Some(&serde_json::json!({ "handle": self.handle, "error": err.message })),
            );
        }
    }
}
