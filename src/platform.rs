//! Types shared by the POSIX and agent platforms.

use crate::errors::TransportError;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argv {
    /// Sent to the remote side verbatim.
    Line(String),
    /// Quoted for the remote side before sending.
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Inherit,
    Pipe,
    Null,
    Path(String),
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub args: Argv,
    pub shell: bool,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Written to the channel right after the command, before anything else.
    pub bootstrap_input: Option<Vec<u8>>,
}

impl ProcessSpec {
    fn with_args(args: Argv) -> Self {
        Self {
            args,
            shell: false,
            cwd: None,
            env: BTreeMap::new(),
            stdin: Redirect::Inherit,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
            bootstrap_input: None,
        }
    }

    pub fn line(command: impl Into<String>) -> Self {
        Self::with_args(Argv::Line(command.into()))
    }

    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_args(Argv::List(args.into_iter().map(Into::into).collect()))
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, redirect: Redirect) -> Self {
        self.stdin = redirect;
        self
    }

    pub fn stdout(mut self, redirect: Redirect) -> Self {
        self.stdout = redirect;
        self
    }

    pub fn stderr(mut self, redirect: Redirect) -> Self {
        self.stderr = redirect;
        self
    }

    pub fn bootstrap_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.bootstrap_input = Some(input.into());
        self
    }

    /// Human-readable form for logs and error messages.
    pub fn display(&self) -> String {
        match &self.args {
            Argv::Line(line) => line.clone(),
            Argv::List(list) => list.join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub args: String,
    pub returncode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CompletedProcess {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    pub fn check(self) -> Result<Self, TransportError> {
        if self.success() {
            return Ok(self);
        }
        Err(TransportError::command_failed(self.returncode, &self.args))
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub write: bool,
    pub binary: bool,
}

impl OpenMode {
    /// Accepts `r`, `w` and `b`; read and write together are rejected.
    pub fn parse(mode: &str) -> Result<Self, TransportError> {
        let mut read = false;
        let mut write = false;
        let mut binary = false;
        for c in mode.chars() {
            match c {
                'r' => read = true,
                'w' => write = true,
                'b' => binary = true,
                other => {
                    return Err(TransportError::invalid_params(format!(
                        "{}: unknown file mode",
                        other
                    )))
                }
            }
        }
        if read && write {
            return Err(TransportError::invalid_params(
                "mixed read/write streams are not supported",
            ));
        }
        Ok(Self { write, binary })
    }

    pub fn is_read(&self) -> bool {
        !self.write
    }

    /// Mode string as the agent expects it.
    pub fn as_agent_str(&self) -> &'static str {
        match (self.write, self.binary) {
            (false, false) => "r",
            (false, true) => "rb",
            (true, false) => "w",
            (true, true) => "wb",
        }
    }
}

/// Operations every platform offers regardless of the remote protocol.
pub trait Platform: Send {
    fn name(&self) -> &'static str;

    fn run(
        &mut self,
        spec: ProcessSpec,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<CompletedProcess, TransportError>;

    fn which(&mut self, name: &str) -> Result<Option<String>, TransportError>;

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TransportError>;

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), TransportError>;

    fn host_hash(&mut self) -> Result<String, TransportError>;
}
