//! Turns a [`ProcessSpec`] into a single shell line whose output window and
//! exit status can be located in the shared stream.

use crate::constants::posix;
use crate::errors::TransportError;
use crate::platform::{Argv, ProcessSpec, Redirect};
use crate::utils::quote::{join, quote};
use crate::utils::random::random_token;
use once_cell::sync::Lazy;
use regex::Regex;

static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimiterTriple {
    pub start: String,
    pub end: String,
    pub code: String,
}

impl DelimiterTriple {
    /// Three distinct random tokens of `length` alphanumerics.
    pub fn generate(length: usize) -> Self {
        let start = random_token(length);
        let mut end = random_token(length);
        while end == start {
            end = random_token(length);
        }
        let mut code = random_token(length);
        while code == start || code == end {
            code = random_token(length);
        }
        Self { start, end, code }
    }
}

#[derive(Debug, Clone)]
pub struct FramedCommand {
    /// Full line including the trailing newline.
    pub line: Vec<u8>,
    pub command: String,
    pub delimiters: DelimiterTriple,
}

fn redirect_suffix(out: &mut String, fd: &str, redirect: &Redirect) {
    match redirect {
        Redirect::Path(path) => {
            out.push_str(&format!(" {}{}", fd, quote(path)));
        }
        Redirect::Null => {
            out.push_str(&format!(" {}{}", fd, posix::DEV_NULL));
        }
        Redirect::Inherit | Redirect::Pipe => {}
    }
}

/// The command text without framing.
pub fn build_command(spec: &ProcessSpec) -> Result<String, TransportError> {
    let mut command = match &spec.args {
        Argv::Line(line) => {
            if line.trim().is_empty() {
                return Err(TransportError::invalid_params("empty command line"));
            }
            line.clone()
        }
        Argv::List(list) => {
            if list.is_empty() {
                return Err(TransportError::invalid_params("empty argument list"));
            }
            join(list)
        }
    };

    if spec.shell {
        command = join(&[posix::SHELL, "-c", command.as_str()]);
    }

    if !spec.env.is_empty() {
        let mut assignments = Vec::with_capacity(spec.env.len());
        for (key, value) in &spec.env {
            if !ENV_KEY_RE.is_match(key) {
                return Err(TransportError::invalid_params(format!(
                    "invalid environment variable name: {:?}",
                    key
                )));
            }
            assignments.push(format!("{}={}", key, quote(value)));
        }
        command = format!("{} {}", assignments.join(" "), command);
    }

    if let Some(cwd) = spec.cwd.as_deref() {
        command = format!("(cd {} && {})", quote(cwd), command);
    }

    redirect_suffix(&mut command, ">", &spec.stdout);
    redirect_suffix(&mut command, "2>", &spec.stderr);
    match &spec.stdin {
        Redirect::Pipe => {}
        Redirect::Path(path) => command.push_str(&format!(" 0<{}", quote(path))),
        // Anything that reads stdin without a pipe would eat our next command.
        Redirect::Null | Redirect::Inherit => {
            command.push_str(&format!(" 0<{}", posix::DEV_NULL))
        }
    }

    Ok(command)
}

pub fn frame(spec: &ProcessSpec, delimiter_length: usize) -> Result<FramedCommand, TransportError> {
    let command = build_command(spec)?;
    let delimiters = DelimiterTriple::generate(delimiter_length);
    let line = format!(
        " export PS1=;echo; echo {}; {}; R=$?; echo {}; echo $R; echo {}\n",
        delimiters.start, command, delimiters.end, delimiters.code
    );
    Ok(FramedCommand {
        line: line.into_bytes(),
        command,
        delimiters,
    })
}
