//! Tests for serve, status, cancel, finish-early, watch and the global socket flag.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;
use std::path::PathBuf;

#[test]
fn cli_parse_serve() {
    assert!(matches!(parse(&["yoink", "serve"]), CliCommand::Serve));
}

#[test]
fn cli_parse_status() {
    assert!(matches!(parse(&["yoink", "status"]), CliCommand::Status));
}

#[test]
fn cli_parse_cancel() {
    match parse(&["yoink", "cancel", "3f2a9c1e"]) {
        CliCommand::Cancel { id } => assert_eq!(id, "3f2a9c1e"),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_parse_finish_early() {
    match parse(&["yoink", "finish-early", "pl-1"]) {
        CliCommand::FinishEarly { id } => assert_eq!(id, "pl-1"),
        _ => panic!("expected FinishEarly"),
    }
}

#[test]
fn cli_parse_watch() {
    match parse(&["yoink", "watch", "j9"]) {
        CliCommand::Watch { id } => assert_eq!(id, "j9"),
        _ => panic!("expected Watch"),
    }
}

#[test]
fn cli_parse_socket_flag_after_subcommand() {
    let cli = Cli::try_parse_from(["yoink", "status", "--socket", "/tmp/y.sock"]).unwrap();
    assert_eq!(cli.socket, Some(PathBuf::from("/tmp/y.sock")));
    assert!(matches!(cli.command, CliCommand::Status));
}

#[test]
fn cli_rejects_unknown_subcommand() {
    assert!(Cli::try_parse_from(["yoink", "pause", "1"]).is_err());
}
