//! `Read`/`Write` adapters over a framed process, used for remote files.

use super::process::PosixProcess;
use crate::config::TransportConfig;
use crate::constants::control;
use crate::errors::{TransportError, TransportErrorKind};
use std::io;

/// Prepares bytes for a process stdin that sits behind a terminal: control
/// bytes get a literal-next prefix and long unterminated lines are pushed
/// through with `^D` before the line discipline truncates them.
#[derive(Debug, Clone)]
pub struct StdinEncoder {
    escape: bool,
    control: [bool; 256],
    flush_threshold: usize,
    since_newline: usize,
}

impl StdinEncoder {
    pub fn new(has_pty: bool, config: &TransportConfig) -> Self {
        let mut table = [false; 256];
        for code in &config.control_codes {
            table[*code as usize] = true;
        }
        Self {
            escape: has_pty,
            control: table,
            flush_threshold: config.flush_threshold.max(1),
            since_newline: 0,
        }
    }

    pub fn since_newline(&self) -> usize {
        self.since_newline
    }

    pub fn encode(&mut self, data: &[u8]) -> Vec<u8> {
        if !self.escape {
            if let Some(pos) = data.iter().rposition(|b| *b == control::NEWLINE) {
                self.since_newline = data.len() - pos - 1;
            } else {
                self.since_newline += data.len();
            }
            return data.to_vec();
        }
        let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 1);
        for &byte in data {
            if byte == control::NEWLINE {
                self.since_newline = 0;
            } else {
                self.since_newline += 1;
            }
            if self.control[byte as usize] {
                out.push(control::LITERAL_NEXT);
            }
            out.push(byte);
            if self.since_newline >= self.flush_threshold {
                out.push(control::CTRL_D);
                self.since_newline = 0;
            }
        }
        out
    }

    /// One `^D` ends input at a line start; mid-line the first only flushes.
    pub fn eof_sequence(&self) -> Vec<u8> {
        if self.since_newline > 0 {
            vec![control::CTRL_D, control::CTRL_D]
        } else {
            vec![control::CTRL_D]
        }
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream is closed")
}

pub struct RemoteReader<'p> {
    process: Option<PosixProcess<'p>>,
    exit: Option<Vec<u8>>,
    path: String,
}

impl<'p> RemoteReader<'p> {
    pub fn new(process: PosixProcess<'p>, exit: Option<Vec<u8>>, path: impl Into<String>) -> Self {
        Self {
            process: Some(process),
            exit,
            path: path.into(),
        }
    }

    /// Stops the method, terminating it if it does not exit promptly, and
    /// leaves the channel ready for the next command. A method that ran to
    /// the end with a non-zero status is reported as a failed read.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        if process.returncode().is_some() {
            let failure = process.read_failure(&self.path);
            process.detach()?;
            return failure.map_or(Ok(()), Err);
        }
        if let Some(exit) = self.exit.as_deref() {
            process.send_raw(exit)?;
        }
        let timeout = process.reader_close_timeout();
        match process.wait(Some(timeout)) {
            Ok(_) => {}
            Err(err) if err.is(TransportErrorKind::Timeout) => process.terminate()?,
            Err(err) => return Err(err),
        }
        process.detach()
    }
}

impl io::Read for RemoteReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let process = self.process.as_mut().ok_or_else(detached)?;
        let timeout = process.recv_timeout();
        Ok(process.read_stdout(buf, timeout)?)
    }
}

impl Drop for RemoteReader<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct RemoteWriter<'p> {
    process: Option<PosixProcess<'p>>,
    exit: Option<Vec<u8>>,
}

impl<'p> RemoteWriter<'p> {
    pub fn new(process: PosixProcess<'p>, exit: Option<Vec<u8>>) -> Self {
        Self {
            process: Some(process),
            exit,
        }
    }

    /// Sends the method's exit command, then EOF unless the process is
    /// already gone, and waits for it to finish writing.
    pub fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        if let Some(exit) = self.exit.as_deref() {
            process.send_raw(exit)?;
        }
        if process.poll()?.is_none() {
            process.close_stdin()?;
            let timeout = process.writer_close_timeout();
            match process.wait(Some(timeout)) {
                Ok(_) => {}
                Err(err) if err.is(TransportErrorKind::Timeout) => process.terminate()?,
                Err(err) => return Err(err),
            }
        }
        process.detach()
    }
}

impl io::Write for RemoteWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let process = self.process.as_mut().ok_or_else(detached)?;
        process.write_stdin(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RemoteWriter<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub enum RemoteFile<'p> {
    Reader(RemoteReader<'p>),
    Writer(RemoteWriter<'p>),
}

impl RemoteFile<'_> {
    pub fn is_reader(&self) -> bool {
        matches!(self, RemoteFile::Reader(_))
    }

    pub fn close(mut self) -> Result<(), TransportError> {
        match &mut self {
            RemoteFile::Reader(reader) => reader.close(),
            RemoteFile::Writer(writer) => writer.close(),
        }
    }
}

impl io::Read for RemoteFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RemoteFile::Reader(reader) => io::Read::read(reader, buf),
            RemoteFile::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for writing",
            )),
        }
    }
}

impl io::Write for RemoteFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RemoteFile::Writer(writer) => io::Write::write(writer, buf),
            RemoteFile::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file was opened for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RemoteFile::Writer(writer) => io::Write::flush(writer),
            RemoteFile::Reader(_) => Ok(()),
        }
    }
}
