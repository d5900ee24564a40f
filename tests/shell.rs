use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

fn pipesh() -> Command {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_pipesh"));
	cmd.env_remove("PIPESH_LOG");
	cmd
}

fn run_line(line: &str) -> Output {
	pipesh().arg("-c").arg(line).output().unwrap()
}

fn run_session(input: &str) -> Output {
	let mut child = pipesh()
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.unwrap();
	child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
	child.wait_with_output().unwrap()
}

#[test]
fn pipeline_output_reaches_stdout() {
	let out = run_line("printf A | wc -c");
	assert!(out.status.success());
	assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1");
}

#[test]
fn exit_status_is_the_last_stage() {
	assert_eq!(run_line("true | false").status.code(), Some(1));
	assert_eq!(run_line("false | true").status.code(), Some(0));
}

#[test]
fn unknown_program_is_reported_by_the_child() {
	let out = run_line("pipesh-no-such-program arg");
	assert_eq!(out.status.code(), Some(1));
	let stderr = String::from_utf8_lossy(&out.stderr);
	assert!(stderr.contains("pipesh: pipesh-no-such-program: command not found"), "{}", stderr);
}

#[test]
fn parse_errors_are_reported() {
	let out = run_line("cat <");
	assert_eq!(out.status.code(), Some(1));
	assert!(String::from_utf8_lossy(&out.stderr).contains("missing file name after '<'"));
}

#[test]
fn lone_ampersand_is_silently_ignored() {
	let out = run_line("  &  ");
	assert_eq!(out.status.code(), Some(0));
	assert!(out.stderr.is_empty(), "{}", String::from_utf8_lossy(&out.stderr));
	assert!(out.stdout.is_empty());
}

#[test]
fn builtin_output_follows_pipes() {
	let out = run_line("jobs | cat");
	assert!(out.status.success());
	assert_eq!(String::from_utf8_lossy(&out.stdout), "Active background jobs:\n");
}

#[test]
fn redirection_truncates_across_lines() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("out.txt");
	let script = format!(
		"echo hello there > {0}\necho hello > {0}\ncat < {0} | wc -c > {0}.count\nexit\n",
		file.display()
	);
	let out = run_session(&script);
	assert!(out.status.success());
	assert_eq!(fs::read_to_string(&file).unwrap(), "hello\n");
	assert_eq!(fs::read_to_string(dir.path().join("out.txt.count")).unwrap().trim(), "6");
}

#[test]
fn session_survives_errors_and_exits_cleanly() {
	let out = run_session("cat < /pipesh/no/such/file\n| wc\nfg 999999\nfg\nexit\n");
	assert_eq!(out.status.code(), Some(0));
	let stderr = String::from_utf8_lossy(&out.stderr);
	assert!(stderr.contains("cannot open /pipesh/no/such/file"), "{}", stderr);
	assert!(stderr.contains("empty command"), "{}", stderr);
	assert!(stderr.contains("fg: no such job: 999999"), "{}", stderr);
	assert!(stderr.contains("usage: fg <pid>"), "{}", stderr);
	assert!(String::from_utf8_lossy(&out.stdout).contains("Exiting pipesh..."));
}

#[test]
fn eof_does_not_wait_for_background_jobs() {
	let start = Instant::now();
	let mut child = pipesh()
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::null())
		.spawn()
		.unwrap();
	child.stdin.take().unwrap().write_all(b"sleep 1 &\njobs\n").unwrap();
	assert!(child.wait().unwrap().success());
	assert!(start.elapsed() < Duration::from_millis(800));

	// The job still holds the pipe, so this returns once it exits.
	let mut stdout = String::new();
	child.stdout.take().unwrap().read_to_string(&mut stdout).unwrap();
	assert!(stdout.contains("[bg] "), "{}", stdout);
	assert!(stdout.contains("Running\tsleep"), "{}", stdout);
}

#[test]
fn fg_blocks_until_the_job_exits_and_forgets_it() {
	let start = Instant::now();
	let mut child = pipesh()
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.unwrap();
	let mut stdin = child.stdin.take().unwrap();
	let mut stdout = BufReader::new(child.stdout.take().unwrap());

	stdin.write_all(b"sleep 1 &\n").unwrap();
	stdin.flush().unwrap();
	let mut pid = None;
	let mut line = String::new();
	while pid.is_none() {
		line.clear();
		assert!(stdout.read_line(&mut line).unwrap() > 0, "shell closed stdout early");
		pid = line.split("[bg] ").nth(1).map(|p| p.trim().to_string());
	}
	let pid = pid.unwrap();
	assert!(start.elapsed() < Duration::from_millis(800));

	write!(stdin, "fg {}\njobs\nexit\n", pid).unwrap();
	drop(stdin);
	let mut rest = String::new();
	stdout.read_to_string(&mut rest).unwrap();
	assert!(child.wait().unwrap().success());
	assert!(start.elapsed() >= Duration::from_millis(900));

	assert!(rest.contains(&format!("{}\tsleep", pid)), "{}", rest);
	let listing = rest.split("Active background jobs:").nth(1).unwrap();
	assert!(!listing.contains("sleep"), "{}", rest);
}
