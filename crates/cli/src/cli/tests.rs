use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_serve_with_flags() {
	let args = vec![
		"tabcast",
		"serve",
		"--config",
		"/etc/tabcast.json",
		"--base-port",
		"20000",
		"--port-range",
		"100",
		"--idle-timeout",
		"600",
		"--driver",
		"/usr/local/bin/agent-browser",
		"--cdp-port",
		"9222",
	];
	let cli = Cli::try_parse_from(args).unwrap();

	match cli.command {
		Commands::Serve(args) => {
			assert_eq!(args.config, Some(PathBuf::from("/etc/tabcast.json")));
			assert_eq!(args.base_port, Some(20000));
			assert_eq!(args.port_range, Some(100));
			assert_eq!(args.idle_timeout, Some(600));
			assert_eq!(args.driver.as_deref(), Some("/usr/local/bin/agent-browser"));
			assert_eq!(args.cdp_port, Some(9222));
			assert_eq!(args.reaper_interval, None);
		}
		_ => panic!("Expected Serve command"),
	}
}

#[test]
fn parse_session_ensure() {
	let cli = Cli::try_parse_from(["tabcast", "session", "ensure", "thread-42"]).unwrap();

	match cli.command {
		Commands::Session(SessionAction::Ensure { key }) => assert_eq!(key, "thread-42"),
		_ => panic!("Expected Session Ensure command"),
	}
}

#[test]
fn parse_session_exec_takes_trailing_args() {
	let cli = Cli::try_parse_from(["tabcast", "session", "exec", "t1", "--", "fill", "@e3", "--slowly"]).unwrap();

	match cli.command {
		Commands::Session(SessionAction::Exec { key, args }) => {
			assert_eq!(key, "t1");
			assert_eq!(args, vec!["fill", "@e3", "--slowly"]);
		}
		_ => panic!("Expected Session Exec command"),
	}
}

#[test]
fn session_exec_requires_args() {
	assert!(Cli::try_parse_from(["tabcast", "session", "exec", "t1"]).is_err());
}

#[test]
fn parse_watch_defaults() {
	let cli = Cli::try_parse_from(["tabcast", "watch", "ws://localhost:9417/"]).unwrap();

	match cli.command {
		Commands::Watch(args) => {
			assert_eq!(args.url, "ws://localhost:9417/");
			assert_eq!(args.frames, None);
			assert_eq!(args.max_attempts, 5);
			assert_eq!(args.initial_delay_ms, 1000);
			assert_eq!(args.max_delay_ms, 30_000);
		}
		_ => panic!("Expected Watch command"),
	}
}

#[test]
fn global_flags_after_subcommand() {
	let cli = Cli::try_parse_from(["tabcast", "status", "-vv", "-f", "text", "--control", "127.0.0.1:29999"]).unwrap();
	assert_eq!(cli.verbose, 2);
	assert_eq!(cli.format, OutputFormat::Text);
	assert_eq!(cli.control_addr(), "127.0.0.1:29999".parse::<SocketAddr>().unwrap());
	assert!(matches!(cli.command, Commands::Status));
}

#[test]
fn control_defaults_to_loopback() {
	let cli = Cli::try_parse_from(["tabcast", "stop"]).unwrap();
	assert_eq!(cli.format, OutputFormat::Json);
	assert_eq!(cli.control_addr(), default_control_addr());
	assert_eq!(default_control_addr(), tabcast::StreamConfig::default().control_addr);
}

#[test]
fn unknown_format_is_rejected() {
	assert!(Cli::try_parse_from(["tabcast", "-f", "toon", "status"]).is_err());
}
