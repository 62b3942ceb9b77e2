pub mod control {
    pub const CTRL_C: u8 = 0x03;
    pub const CTRL_D: u8 = 0x04;
    pub const LITERAL_NEXT: u8 = 0x16;
    pub const QUIT: u8 = 0x1C;
    pub const DEL: u8 = 0x7F;
    pub const NEWLINE: u8 = 0x0A;

    pub const KILL_SEQUENCE: &[u8] = &[CTRL_C, CTRL_C];
    pub const TERMINATE_SEQUENCE: &[u8] = &[QUIT, QUIT];
}

pub mod delimiters {
    pub const MIN_LENGTH: usize = 10;
    pub const DEFAULT_LENGTH: usize = 10;
}

pub mod timeouts {
    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const RECV_MS: u64 = 30_000;
    pub const READER_CLOSE_MS: u64 = 100;
    pub const WRITER_CLOSE_MS: u64 = 100_000;
    pub const RECLAIM_MS: u64 = 2_000;
    pub const PROBE_MS: u64 = 10_000;
    pub const CHANNEL_SLICE_MS: u64 = 20;
}

pub mod limits {
    pub const READ_CHUNK: usize = 4096;
    pub const FLUSH_THRESHOLD: usize = 4095;
    pub const AGENT_WRITE_CHUNK: usize = 64 * 1024;
    pub const BOOTSTRAP_CHUNK: usize = 1900;
    pub const COMMAND_PREVIEW_BYTES: usize = 200;
}

pub mod return_codes {
    /// Recorded after kill/terminate; the remote process may still be alive.
    pub const SIGNALLED: i32 = -1;
}

pub mod posix {
    pub const SHELL: &str = "/bin/sh";
    pub const DEV_NULL: &str = "/dev/null";
    pub const NONINTERACTIVE_STTY: &str = " stty -echo nl lnext ^V";
    pub const INTERACTIVE_STTY: &str = " stty sane";
    pub const PTY_PROBE: &str = "[ -t 1 ]";
    pub const PYTHON_BINARIES: &[&str] = &[
        "python",
        "python2",
        "python2.7",
        "python3",
        "python3.6",
        "python3.8",
        "python3.9",
    ];
}

pub mod agent {
    pub const RUNNING: &str = "R";
    pub const POLL_ERROR: &str = "E";
    pub const NOT_FOUND: &str = "E:NOTFOUND";
    pub const DENIED: &str = "E:DENIED";
    pub const PROCESS_NOT_FOUND: &str = "E:PROC";
    pub const SCRIPT_EXCEPTION: &str = "E:S2:EXCEPTION:";
    pub const SCRIPT_ERROR: &str = "E:PWSH:";
    pub const SCRIPT_END: &str = "END";
    pub const READY_MARKER: &[u8] = b"READY";
    pub const SHELL_PREFIX: &[&str] = &["powershell.exe", "-noprofile", "-command"];
    pub const WHICH_COMMAND: &str = "where.exe";
}
