mod common;
use common::FakeAgent;

use shellwire::errors::TransportErrorKind;
use shellwire::{Platform, ProcessSpec, Redirect};
use std::io::{Read, Write};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

#[test]
fn missing_and_denied_paths_map_to_error_kinds() {
    let agent = FakeAgent::new().with_denied("C:\\Windows\\System32\\config\\SAM");
    let mut platform = agent.connect();

    let err = platform
        .open("C:\\missing.txt", "r")
        .err()
        .expect("missing file");
    assert_eq!(err.kind, TransportErrorKind::NotFound);

    let err = platform
        .open("C:\\Windows\\System32\\config\\SAM", "rb")
        .err()
        .expect("denied file");
    assert_eq!(err.kind, TransportErrorKind::AccessDenied);
    assert_eq!(platform.open_handle_count(), 0);
}

#[test]
fn file_round_trip_with_chunked_writes() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    platform
        .write_file("C:\\Temp\\blob.bin", &data)
        .expect("write");
    assert_eq!(agent.file("C:\\Temp\\blob.bin").unwrap(), data);
    assert_eq!(platform.read_file("C:\\Temp\\blob.bin").expect("read"), data);
    assert_eq!(platform.open_handle_count(), 0);
}

#[test]
fn handles_close_exactly_once_and_reopen_is_fresh() {
    let agent = FakeAgent::new().with_file("C:\\notes.txt", b"hello agent");
    let mut platform = agent.connect();

    let first = {
        let mut file = platform.open("C:\\notes.txt", "r").expect("open");
        let handle = file.handle();
        let mut text = String::new();
        file.read_to_string(&mut text).expect("read");
        assert_eq!(text, "hello agent");
        file.close().expect("close");
        handle
    };
    assert_eq!(agent.closes(), vec![first]);
    assert!(!platform.is_open(first));

    let second = {
        let file = platform.open("C:\\notes.txt", "r").expect("reopen");
        file.handle()
    };
    assert_ne!(first, second);
    assert_eq!(agent.closes(), vec![first, second]);
}

#[test]
fn write_handles_reject_reads() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let mut file = platform.open("C:\\out.txt", "w").expect("open");
    file.write_all(b"abc").expect("write");
    let mut buf = [0u8; 4];
    assert!(file.read(&mut buf).is_err());
    file.close().expect("close");
    assert_eq!(agent.file("C:\\out.txt").unwrap(), b"abc");
}

#[test]
fn run_collects_output_and_releases_every_handle() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let done = platform
        .run(ProcessSpec::argv(["whoami", "/all"]), None, WAIT)
        .expect("run");
    assert_eq!(done.returncode, 0);
    assert_eq!(done.stdout, b"ran whoami /all\r\n");
    assert_eq!(platform.open_handle_count(), 0);
    assert_eq!(agent.live_objects(), 0);
}

#[test]
fn shell_commands_go_through_powershell() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    platform
        .run(ProcessSpec::line("Get-Date -Format o").shell(true), None, WAIT)
        .expect("run");
    assert_eq!(
        agent.cmdlines(),
        vec!["powershell.exe -noprofile -command \"Get-Date -Format o\"".to_string()]
    );
}

#[test]
fn unknown_executable_is_not_found() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let err = platform
        .run(ProcessSpec::argv(["missing.exe"]), None, WAIT)
        .expect_err("no such program");
    assert_eq!(err.kind, TransportErrorKind::NotFound);
    assert_eq!(platform.open_handle_count(), 0);
}

#[test]
fn cwd_env_and_path_redirects_are_unsupported() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    for spec in [
        ProcessSpec::line("dir").cwd("C:\\"),
        ProcessSpec::line("set").env("A", "1"),
        ProcessSpec::line("dir").stdout(Redirect::Path("C:\\out".to_string())),
    ] {
        let err = platform.popen(spec).err().expect("unsupported");
        assert_eq!(err.kind, TransportErrorKind::InvalidParams);
    }
    assert!(agent.cmdlines().is_empty());
}

#[test]
fn line_breaks_in_arguments_never_reach_the_agent() {
    let agent = FakeAgent::new().with_file("C:\\a.txt", b"alpha");
    let mut platform = agent.connect();

    let err = platform
        .open("C:\\a.txt\nProcess", "r")
        .err()
        .expect("path with a newline");
    assert_eq!(err.kind, TransportErrorKind::InvalidParams);
    assert_eq!(platform.open_handle_count(), 0);
    assert_eq!(agent.live_objects(), 0);

    let err = platform
        .popen(ProcessSpec::line("whoami\r\nnet user"))
        .err()
        .expect("command with a line break");
    assert_eq!(err.kind, TransportErrorKind::InvalidParams);
    assert!(agent.cmdlines().is_empty());

    assert_eq!(platform.read_file("C:\\a.txt").expect("read"), b"alpha");
}

#[test]
fn kill_stops_a_running_process() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    {
        let mut process = platform
            .popen(ProcessSpec::line("hang forever").stdout(Redirect::Pipe))
            .expect("popen");
        assert_eq!(process.poll().expect("poll"), None);
        let handle = process.handle();
        process.kill().expect("kill");
        assert_eq!(process.returncode(), Some(-1));
        assert_eq!(agent.kills(), vec![handle]);
    }
    assert_eq!(platform.open_handle_count(), 0);
}

#[test]
fn run_timeout_kills_the_process() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let err = platform
        .run(
            ProcessSpec::line("hang"),
            None,
            Some(Duration::from_millis(20)),
        )
        .expect_err("timeout");
    assert_eq!(err.kind, TransportErrorKind::Timeout);
    assert_eq!(agent.kills().len(), 1);
    assert_eq!(platform.open_handle_count(), 0);
}

#[test]
fn which_runs_where_and_caches() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    assert_eq!(
        platform.which("cmd").unwrap().as_deref(),
        Some("C:\\Windows\\System32\\cmd.exe")
    );
    assert_eq!(platform.which("cmd").unwrap().as_deref(), Some("C:\\Windows\\System32\\cmd.exe"));
    assert_eq!(platform.which("nc").unwrap(), None);
    assert_eq!(agent.cmdlines().len(), 2);
}

#[test]
fn scripts_return_json_values_or_fail() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let values = platform.run_script("Get-Process", 2).expect("script");
    assert_eq!(values.len(), 2);
    assert_eq!(values[0]["script"], "Get-Process");
    assert_eq!(values[1]["depth"], "2");

    let err = platform.run_script("throw 'no'", 1).expect_err("script error");
    assert_eq!(err.kind, TransportErrorKind::CommandFailed);
    assert_eq!(err.message, "script failed");
}

#[test]
fn host_hash_needs_a_reported_identifier() {
    let agent = FakeAgent::new();
    let mut platform = agent.connect();
    let err = platform.host_hash().expect_err("no identifier");
    assert_eq!(err.kind, TransportErrorKind::NotFound);
}
