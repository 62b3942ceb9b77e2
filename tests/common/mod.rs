#![allow(dead_code)]

use once_cell::sync::Lazy;
use regex::Regex;
use shellwire::agent::protocol::{decode_payload, Handle};
use shellwire::channel::MemoryChannel;
use shellwire::services::logger::{LogLevel, Logger};
use shellwire::{AgentPlatform, PosixPlatform, TransportConfig};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ export PS1=;echo; echo (\w+); (.*); R=\$\?; echo (\w+); echo \$R; echo (\w+)$")
        .unwrap()
});

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const LNEXT: u8 = 0x16;
const QUIT: u8 = 0x1c;

pub fn quiet_logger() -> Logger {
    Logger::capturing("test", LogLevel::Off)
}

pub fn fast_config() -> TransportConfig {
    TransportConfig::default()
        .with_poll_interval(Duration::from_millis(2))
        .with_recv_timeout(Duration::from_millis(500))
        .with_reader_close_timeout(Duration::from_millis(50))
        .with_writer_close_timeout(Duration::from_millis(500))
        .with_reclaim_timeout(Duration::from_millis(50))
}

/// Minimal word splitter for the quoting the framer produces.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_word = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(next) = chars.next() {
                                current.push(next);
                            }
                        }
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

#[derive(Debug, Clone)]
struct Frame {
    start: String,
    end: String,
    code: String,
}

impl Frame {
    fn opening(&self) -> Vec<u8> {
        format!("\n{}\n", self.start).into_bytes()
    }

    fn closing(&self, code: i32) -> Vec<u8> {
        format!("{}\n{}\n{}\n", self.end, code, self.code).into_bytes()
    }
}

#[derive(Debug, Clone, Default)]
struct Redirects {
    stdout_null: bool,
    stdout_file: Option<String>,
}

#[derive(Debug, Clone)]
enum Job {
    /// Collects stdin until EOF, writes it to `targets` and echoes it unless
    /// `quiet`.
    Copy { targets: Vec<String>, quiet: bool },
    /// Reads command lines from stdin; `exec CMD` replaces it.
    Script,
    Hang,
}

struct Running {
    frame: Frame,
    job: Job,
    redirects: Redirects,
    input: Vec<u8>,
    line: Vec<u8>,
    since_newline: usize,
    escaped: bool,
}

enum Outcome {
    Done { out: Vec<u8>, code: i32 },
    Job(Job),
    /// Exit status line that is not a number.
    Garbled,
}

/// Replaces a program's normal behavior.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Exit(i32),
    /// Prints a non-numeric exit status.
    Garble,
}

#[derive(Default)]
struct ShellState {
    pty: bool,
    binaries: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    unreadable: BTreeSet<String>,
    faults: BTreeMap<String, Fault>,
    commands: Vec<String>,
    lines: Vec<String>,
    current: Option<Frame>,
    idle_line: Vec<u8>,
    running: Option<Running>,
}

impl ShellState {
    fn handle(&mut self, data: &[u8]) -> Vec<u8> {
        let mut reply = Vec::new();
        let mut idx = 0;
        while idx < data.len() {
            let byte = data[idx];
            idx += 1;
            if self.running.is_none() {
                match byte {
                    b'\n' => {
                        let line = String::from_utf8_lossy(&std::mem::take(&mut self.idle_line))
                            .to_string();
                        reply.extend(self.line(&line));
                    }
                    b if b < 0x20 => {}
                    b => self.idle_line.push(b),
                }
                continue;
            }
            reply.extend(self.feed_running(byte));
        }
        reply
    }

    fn feed_running(&mut self, byte: u8) -> Vec<u8> {
        let pty = self.pty;
        let Some(run) = self.running.as_mut() else {
            return Vec::new();
        };
        if pty && run.escaped {
            run.escaped = false;
            return self.push_input(byte);
        }
        match byte {
            LNEXT if pty => {
                run.escaped = true;
                Vec::new()
            }
            CTRL_C => {
                // The whole command line is abandoned, markers included.
                self.running = None;
                Vec::new()
            }
            QUIT => {
                let run = self.running.take();
                run.map(|run| run.frame.closing(131)).unwrap_or_default()
            }
            CTRL_D => {
                if run.since_newline == 0 {
                    self.finish_eof()
                } else {
                    run.since_newline = 0;
                    Vec::new()
                }
            }
            other => self.push_input(other),
        }
    }

    fn push_input(&mut self, byte: u8) -> Vec<u8> {
        let Some(run) = self.running.as_mut() else {
            return Vec::new();
        };
        run.input.push(byte);
        if byte == b'\n' {
            run.since_newline = 0;
        } else {
            run.since_newline += 1;
        }
        if !matches!(run.job, Job::Script) {
            return Vec::new();
        }
        if byte != b'\n' {
            run.line.push(byte);
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut run.line)).to_string();
        let Some(command) = line.trim().strip_prefix("exec ") else {
            return Vec::new();
        };
        let command = command.to_string();
        match self.execute(&command) {
            (Outcome::Done { out, code }, redirects) => {
                let run = self.running.take();
                let Some(run) = run else {
                    return Vec::new();
                };
                let mut reply = self.emit(&run.redirects, &redirects, out);
                reply.extend(run.frame.closing(code));
                reply
            }
            (Outcome::Job(job), _) => {
                if let Some(run) = self.running.as_mut() {
                    run.job = job;
                }
                Vec::new()
            }
            (Outcome::Garbled, _) => Vec::new(),
        }
    }

    fn finish_eof(&mut self) -> Vec<u8> {
        let Some(run) = self.running.take() else {
            return Vec::new();
        };
        if matches!(run.job, Job::Hang) {
            self.running = Some(run);
            return Vec::new();
        }
        match run.job.clone() {
            Job::Hang | Job::Script => run.frame.closing(0),
            Job::Copy { targets, quiet } => {
                for target in targets {
                    self.files.insert(target, run.input.clone());
                }
                let out = if quiet { Vec::new() } else { run.input.clone() };
                let mut reply = self.emit(&run.redirects, &Redirects::default(), out);
                reply.extend(run.frame.closing(0));
                reply
            }
        }
    }

    fn emit(&mut self, outer: &Redirects, inner: &Redirects, out: Vec<u8>) -> Vec<u8> {
        for redirects in [inner, outer] {
            if let Some(path) = redirects.stdout_file.as_deref() {
                self.files.insert(path.to_string(), out);
                return Vec::new();
            }
            if redirects.stdout_null {
                return Vec::new();
            }
        }
        out
    }

    fn line(&mut self, line: &str) -> Vec<u8> {
        self.lines.push(line.to_string());
        let Some(caps) = FRAME_RE.captures(line) else {
            return Vec::new();
        };
        let frame = Frame {
            start: caps[1].to_string(),
            end: caps[3].to_string(),
            code: caps[4].to_string(),
        };
        let command = caps[2].to_string();
        self.commands.push(command.clone());
        self.current = Some(frame.clone());
        let mut reply = frame.opening();
        match self.execute(&command) {
            (Outcome::Garbled, _) => {
                reply.extend(format!("{}\nsegfault\n{}\n", frame.end, frame.code).into_bytes());
            }
            (Outcome::Done { out, code }, redirects) => {
                reply.extend(self.emit(&Redirects::default(), &redirects, out));
                reply.extend(frame.closing(code));
            }
            (Outcome::Job(job), redirects) => {
                self.running = Some(Running {
                    frame,
                    job,
                    redirects,
                    input: Vec::new(),
                    line: Vec::new(),
                    since_newline: 0,
                    escaped: false,
                });
            }
        }
        reply
    }

    fn execute(&mut self, command: &str) -> (Outcome, Redirects) {
        let mut redirects = Redirects::default();
        let mut argv = Vec::new();
        let mut env = HashMap::new();
        for word in split_words(command) {
            if word == "0</dev/null" || word.starts_with("2>") {
                continue;
            }
            if word == ">/dev/null" {
                redirects.stdout_null = true;
                continue;
            }
            if let Some(path) = word.strip_prefix('>') {
                redirects.stdout_file = Some(path.to_string());
                continue;
            }
            if argv.is_empty() {
                if let Some((key, value)) = word.split_once('=') {
                    env.insert(key.to_string(), value.to_string());
                    continue;
                }
            }
            argv.push(word);
        }
        if argv.len() == 3 && argv[0] == "/bin/sh" && argv[1] == "-c" {
            let (outcome, inner) = self.execute(&argv[2]);
            let merged = Redirects {
                stdout_null: redirects.stdout_null || inner.stdout_null,
                stdout_file: inner.stdout_file.or(redirects.stdout_file),
            };
            return (outcome, merged);
        }
        (self.builtin(&argv, &env, &redirects), redirects)
    }

    fn builtin(&mut self, argv: &[String], env: &HashMap<String, String>, redirects: &Redirects) -> Outcome {
        let Some(program) = argv.first() else {
            return Outcome::Done { out: Vec::new(), code: 0 };
        };
        let name = program.rsplit('/').next().unwrap_or(program).to_string();
        match self.faults.get(&name) {
            Some(Fault::Exit(code)) => {
                return Outcome::Done {
                    out: Vec::new(),
                    code: *code,
                }
            }
            Some(Fault::Garble) => return Outcome::Garbled,
            None => {}
        }
        let args = &argv[1..];
        let done = |out: &[u8], code: i32| Outcome::Done {
            out: out.to_vec(),
            code,
        };
        match name.as_str() {
            "[" => done(b"", if self.pty { 0 } else { 1 }),
            "which" => match args.first() {
                Some(bin) if self.binaries.contains(bin) => {
                    done(format!("/usr/bin/{}\n", bin).as_bytes(), 0)
                }
                _ => done(b"", 1),
            },
            "echo" => done(format!("{}\n", args.join(" ")).as_bytes(), 0),
            "emit" => done(args.join(" ").as_bytes(), 0),
            "status" => done(b"", args.first().and_then(|a| a.parse().ok()).unwrap_or(0)),
            "printenv" => match args.first().and_then(|key| env.get(key)) {
                Some(value) => done(format!("{}\n", value).as_bytes(), 0),
                None => done(b"", 1),
            },
            "sleep" => Outcome::Job(Job::Hang),
            "garble" => Outcome::Garbled,
            "tease" => match self.current.as_ref() {
                // Marker look-alikes: a cut end token and tokens glued to text.
                Some(frame) => done(
                    format!("{}\n{}X\n{}Y\n", &frame.end[..5], frame.start, frame.end).as_bytes(),
                    0,
                ),
                None => done(b"", 1),
            },
            "test" => {
                let exists = |path: &String| {
                    self.files.contains_key(path) || self.unreadable.contains(path)
                };
                let holds = match (args.first().map(String::as_str), args.get(1)) {
                    (Some("-e"), Some(path)) => exists(path),
                    (Some("-r"), Some(path)) => exists(path) && !self.unreadable.contains(path),
                    _ => false,
                };
                done(b"", if holds { 0 } else { 1 })
            }
            "hostname" => done(b"target.lan\n", 0),
            "ip" => done(
                b"1: lo: <LOOPBACK,UP> mtu 65536\n    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00\n2: eth0: <BROADCAST,UP> mtu 1500\n    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff\n",
                0,
            ),
            "cat" | "tail" | "sed" | "awk" => {
                match args.iter().rev().find(|a| a.starts_with('/')) {
                    Some(path) => self.read(path),
                    None => Outcome::Job(Job::Copy {
                        targets: Vec::new(),
                        quiet: false,
                    }),
                }
            }
            "head" => {
                let limit: usize = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(usize::MAX);
                match args.get(2) {
                    Some(path) => match self.read(path) {
                        Outcome::Done { out, code } => Outcome::Done {
                            out: out.into_iter().take(limit).collect(),
                            code,
                        },
                        other => other,
                    },
                    None => Outcome::Job(Job::Copy {
                        targets: Vec::new(),
                        quiet: false,
                    }),
                }
            }
            "dd" => {
                if let Some(path) = args.iter().find_map(|a| a.strip_prefix("if=")) {
                    return self.read(path);
                }
                let targets = args
                    .iter()
                    .filter_map(|a| a.strip_prefix("of="))
                    .map(str::to_string)
                    .collect();
                Outcome::Job(Job::Copy {
                    targets,
                    quiet: true,
                })
            }
            "tee" => Outcome::Job(Job::Copy {
                targets: args.to_vec(),
                quiet: redirects.stdout_null,
            }),
            "cp" => Outcome::Job(Job::Copy {
                targets: args.iter().skip(1).cloned().collect(),
                quiet: true,
            }),
            "sh" | "bash" => Outcome::Job(Job::Script),
            _ => done(format!("{}: not found\n", program).as_bytes(), 127),
        }
    }

    fn read(&self, path: &str) -> Outcome {
        if self.unreadable.contains(path) {
            return Outcome::Done {
                out: Vec::new(),
                code: 1,
            };
        }
        match self.files.get(path) {
            Some(data) => Outcome::Done {
                out: data.clone(),
                code: 0,
            },
            None => Outcome::Done {
                out: Vec::new(),
                code: 1,
            },
        }
    }
}

/// Scripted `/bin/sh` behind a memory channel. Understands framed lines,
/// a handful of commands, terminal EOF and the kill sequences.
#[derive(Clone, Default)]
pub struct FakeShell {
    state: Arc<StdMutex<ShellState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pty(self, pty: bool) -> Self {
        self.state.lock().unwrap().pty = pty;
        self
    }

    pub fn with_binaries(self, names: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for name in names {
                state.binaries.insert(name.to_string());
            }
        }
        self
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
        self
    }

    pub fn with_fault(self, program: &str, fault: Fault) -> Self {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(program.to_string(), fault);
        self
    }

    /// An existing file that every reader fails on.
    pub fn with_unreadable(self, path: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unreadable
            .insert(path.to_string());
        self
    }

        pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Every complete line the shell received outside a running command.
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().unwrap().lines.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().running.is_some()
    }

    pub fn channel(&self) -> MemoryChannel {
        let state = self.state.clone();
        MemoryChannel::with_responder(move |data| match state.lock() {
            Ok(mut state) => state.handle(data),
            Err(_) => Vec::new(),
        })
    }

    pub fn connect(&self) -> PosixPlatform {
        self.connect_with(fast_config())
    }

    pub fn connect_with(&self, config: TransportConfig) -> PosixPlatform {
        PosixPlatform::connect(Box::new(self.channel()), config, &quiet_logger())
            .expect("connect to fake shell")
    }
}

#[derive(Debug, Clone)]
enum AgentObject {
    File { path: String, write: bool, pos: usize },
    Pipe { data: Vec<u8>, pos: usize },
    Process { exit: Option<i32> },
}

#[derive(Default)]
struct AgentState {
    files: BTreeMap<String, Vec<u8>>,
    denied: BTreeSet<String>,
    next: Handle,
    objects: HashMap<Handle, AgentObject>,
    closes: Vec<Handle>,
    kills: Vec<Handle>,
    cmdlines: Vec<String>,
    console: Vec<String>,
    pending: Vec<u8>,
}

impl AgentState {
    fn allocate(&mut self, object: AgentObject) -> Handle {
        self.next += 4;
        let handle = 100 + self.next;
        self.objects.insert(handle, object);
        handle
    }

    fn handle(&mut self, data: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(data);
        let text = String::from_utf8_lossy(&self.pending).to_string();
        let lines: Vec<&str> = text.split('\n').collect();
        let Some(args_needed) = lines.get(..2).map(|head| match (head[0], head[1]) {
            ("File", "close") | ("Process", "poll") | ("Process", "start") => 1,
            _ => 2,
        }) else {
            return Vec::new();
        };
        if lines.len() < 2 + args_needed + 1 {
            return Vec::new();
        }
        let request: Vec<String> = lines[..2 + args_needed].iter().map(|s| s.to_string()).collect();
        self.pending.clear();
        self.dispatch(&request)
    }

    fn dispatch(&mut self, request: &[String]) -> Vec<u8> {
        let parse = |s: &String| s.parse::<i64>().unwrap_or(-1);
        match (request[0].as_str(), request[1].as_str()) {
            ("File", "open") => {
                let path = request[2].clone();
                let write = request[3].contains('w');
                if self.denied.contains(&path) {
                    return b"E:DENIED\n".to_vec();
                }
                if !write && !self.files.contains_key(&path) {
                    return b"E:NOTFOUND\n".to_vec();
                }
                if write {
                    self.files.insert(path.clone(), Vec::new());
                }
                let handle = self.allocate(AgentObject::File { path, write, pos: 0 });
                format!("{}\n", handle).into_bytes()
            }
            ("File", "read") => {
                let handle = parse(&request[2]);
                let count = parse(&request[3]).max(0) as usize;
                let chunk = match self.objects.get_mut(&handle) {
                    Some(AgentObject::File { path, pos, .. }) => {
                        let data = self.files.get(path.as_str()).cloned().unwrap_or_default();
                        let end = (*pos + count).min(data.len());
                        let chunk = data[*pos..end].to_vec();
                        *pos = end;
                        chunk
                    }
                    Some(AgentObject::Pipe { data, pos }) => {
                        let end = (*pos + count).min(data.len());
                        let chunk = data[*pos..end].to_vec();
                        *pos = end;
                        chunk
                    }
                    _ => Vec::new(),
                };
                let mut reply = format!("{}\n", chunk.len()).into_bytes();
                reply.extend(chunk);
                reply
            }
            ("File", "write") => {
                let handle = parse(&request[2]);
                let data = decode_payload(&request[3]).unwrap_or_default();
                match self.objects.get(&handle) {
                    Some(AgentObject::File { path, write: true, .. }) => {
                        let path = path.clone();
                        self.files.entry(path).or_default().extend_from_slice(&data);
                    }
                    Some(AgentObject::Pipe { .. }) => {}
                    _ => return b"0\n".to_vec(),
                }
                format!("{}\n", data.len()).into_bytes()
            }
            ("File", "close") => {
                let handle = parse(&request[2]);
                self.closes.push(handle);
                self.objects.remove(&handle);
                Vec::new()
            }
            ("Process", "start") => {
                let cmdline = request[2].clone();
                self.cmdlines.push(cmdline.clone());
                let (stdout, exit) = if cmdline.starts_with("missing") {
                    return b"E:PROC\n".to_vec();
                } else if let Some(name) = cmdline.strip_prefix("where.exe ") {
                    if name == "cmd" {
                        (b"C:\\Windows\\System32\\cmd.exe\r\n".to_vec(), Some(0))
                    } else {
                        (Vec::new(), Some(1))
                    }
                } else if cmdline.starts_with("hang") {
                    (Vec::new(), None)
                } else {
                    (format!("ran {}\r\n", cmdline).into_bytes(), Some(0))
                };
                let process = self.allocate(AgentObject::Process { exit });
                let stdin = self.allocate(AgentObject::Pipe {
                    data: Vec::new(),
                    pos: 0,
                });
                let stdout = self.allocate(AgentObject::Pipe {
                    data: stdout,
                    pos: 0,
                });
                let stderr = self.allocate(AgentObject::Pipe {
                    data: Vec::new(),
                    pos: 0,
                });
                format!("{}\n{}\n{}\n{}\n", process, stdin, stdout, stderr).into_bytes()
            }
            ("Process", "poll") => match self.objects.get(&parse(&request[2])) {
                Some(AgentObject::Process { exit: Some(code) }) => format!("{}\n", code).into_bytes(),
                Some(AgentObject::Process { exit: None }) => b"R\n".to_vec(),
                _ => b"E\n".to_vec(),
            },
            ("Process", "kill") => {
                let handle = parse(&request[2]);
                self.kills.push(handle);
                if let Some(AgentObject::Process { exit }) = self.objects.get_mut(&handle) {
                    *exit = Some(1);
                }
                Vec::new()
            }
            ("PowerShell", "run") => {
                let script = decode_payload(&request[2])
                    .map(|raw| String::from_utf8_lossy(&raw).to_string())
                    .unwrap_or_default();
                if script.contains("throw") {
                    return b"E:PWSH:script failed\n".to_vec();
                }
                format!(
                    "{}\n{}\nEND\n",
                    serde_json::json!({ "script": script }),
                    serde_json::json!({ "depth": request[3] })
                )
                .into_bytes()
            }
            _ => b"E:UNKNOWN\n".to_vec(),
        }
    }
}

/// The agent side of the handle protocol, answering synchronously.
#[derive(Clone, Default)]
pub struct FakeAgent {
    state: Arc<StdMutex<AgentState>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), data.to_vec());
        self
    }

    pub fn with_denied(self, path: &str) -> Self {
        self.state.lock().unwrap().denied.insert(path.to_string());
        self
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn closes(&self) -> Vec<Handle> {
        self.state.lock().unwrap().closes.clone()
    }

    pub fn kills(&self) -> Vec<Handle> {
        self.state.lock().unwrap().kills.clone()
    }

    pub fn cmdlines(&self) -> Vec<String> {
        self.state.lock().unwrap().cmdlines.clone()
    }

    pub fn live_objects(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn channel(&self) -> MemoryChannel {
        let state = self.state.clone();
        MemoryChannel::with_responder(move |data| match state.lock() {
            Ok(mut state) => state.handle(data),
            Err(_) => Vec::new(),
        })
    }

    pub fn connect(&self) -> AgentPlatform {
        AgentPlatform::connect(Box::new(self.channel()), fast_config(), &quiet_logger())
    }

    pub fn console_lines(&self) -> Vec<String> {
        self.state.lock().unwrap().console.clone()
    }

    /// A `cmd.exe`-like prompt that refuses writes under `denied_dir`. Once a
    /// line starting with `launch ` arrives the agent takes over the channel
    /// and announces itself with `host_id`.
    pub fn console_channel(&self, denied_dir: &'static str, host_id: &'static str) -> MemoryChannel {
        let state = self.state.clone();
        let mut launched = false;
        let channel = MemoryChannel::with_responder(move |data| {
            let Ok(mut state) = state.lock() else {
                return Vec::new();
            };
            if launched {
                return state.handle(data);
            }
            let line = String::from_utf8_lossy(data).trim_end().to_string();
            state.console.push(line.clone());
            let mut reply = format!("{}\r\n", line).into_bytes();
            if line.starts_with("launch ") {
                launched = true;
                reply.extend_from_slice(format!("READY\r\n{}\r\n", host_id).as_bytes());
                return reply;
            }
            if line.starts_with("echo ") && line.contains(denied_dir) {
                reply.extend_from_slice(b"Access is denied.\r\n");
            }
            reply.extend_from_slice(CONSOLE_PROMPT);
            reply
        });
        channel.handle().push(CONSOLE_PROMPT);
        channel
    }
}

pub const CONSOLE_PROMPT: &[u8] = b"\r\nC:\\Users\\svc>";
