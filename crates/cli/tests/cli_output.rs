//! Runs the `tabcast` binary against a control address with no daemon behind it.

use std::process::Command;

use serde_json::Value;

fn tabcast() -> Command {
	Command::new(env!("CARGO_BIN_EXE_tabcast"))
}

fn closed_control_addr() -> String {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);
	addr.to_string()
}

#[test]
fn status_reports_a_stopped_daemon() {
	let output = tabcast().args(["status", "--control", &closed_control_addr()]).output().unwrap();
	assert!(output.status.success());

	let json: Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "status");
	assert_eq!(json["data"]["running"], false);
}

#[test]
fn session_commands_need_a_daemon() {
	let output = tabcast()
		.args(["session", "list", "--control", &closed_control_addr()])
		.output()
		.unwrap();
	assert!(!output.status.success());

	let json: Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(json["ok"], false);
	assert_eq!(json["command"], "session list");
	assert_eq!(json["error"]["code"], "DAEMON_NOT_RUNNING");

	let stderr = String::from_utf8_lossy(&output.stderr);
	assert!(stderr.contains("tabcast serve"), "{stderr}");
}

#[test]
fn stop_without_daemon_is_not_an_error() {
	let output = tabcast().args(["stop", "--control", &closed_control_addr()]).output().unwrap();
	assert!(output.status.success());

	let json: Value = serde_json::from_slice(&output.stdout).unwrap();
	assert_eq!(json["data"]["stopped"], false);
}

#[test]
fn text_format_prints_plain_lines() {
	let output = tabcast()
		.args(["-f", "text", "session", "get", "t1", "--control", &closed_control_addr()])
		.output()
		.unwrap();
	assert!(!output.status.success());
	assert!(output.stdout.is_empty());
	assert!(String::from_utf8_lossy(&output.stderr).contains("error[DAEMON_NOT_RUNNING]"));
}
