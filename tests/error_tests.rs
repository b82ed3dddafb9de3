// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io;

use chatline::error::TurnDisposition;
use chatline::ChatlineError;

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
    let error: ChatlineError = io_error.into();

    match error {
        ChatlineError::Io(_) => {} // Expected
        _ => panic!("Expected Io error, got different error type"),
    }
}

#[test]
fn test_config_error_display() {
    let error = ChatlineError::Configuration("Missing API key".to_string());
    assert_eq!(error.to_string(), "Configuration error: Missing API key");
}

#[test]
fn test_tool_parse_error_display() {
    let error = ChatlineError::ToolParse("expected name(args)".to_string());
    assert_eq!(error.to_string(), "Malformed tool call: expected name(args)");
}

#[test]
fn test_turn_dispositions() {
    let cases = [
        (ChatlineError::BadRequest("x".into()), TurnDisposition::RollBack),
        (ChatlineError::InvalidArgument("x".into()), TurnDisposition::RollBack),
        (ChatlineError::Configuration("x".into()), TurnDisposition::Fatal),
        (ChatlineError::Completion("x".into()), TurnDisposition::CommitPartial),
        (ChatlineError::ToolParse("x".into()), TurnDisposition::CommitPartial),
    ];
    for (error, expected) in cases {
        assert_eq!(error.turn_disposition(), expected, "{}", error);
    }
}

#[test]
fn test_status_codes() {
    assert!(ChatlineError::from_status(413, "too long").is_bad_request());
    assert!(matches!(
        ChatlineError::from_status(403, "forbidden"),
        ChatlineError::Configuration(_)
    ));
    assert!(matches!(
        ChatlineError::from_status(503, "unavailable"),
        ChatlineError::Completion(_)
    ));
}
