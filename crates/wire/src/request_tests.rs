// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backward compatibility tests for Request deserialization.

use super::*;

#[test]
fn submit_without_idempotency_key() {
    let json = r#"{"type":"Submit","job_type":"local_echo","repo_name":"demo","remote_url":"file:///tmp/demo.git","sha":"abc"}"#;
    let decoded: Request = serde_json::from_str(json).expect("deserialize failed");
    match decoded {
        Request::Submit { job_type, idempotency_key, .. } => {
            assert_eq!(job_type, "local_echo");
            assert!(idempotency_key.is_none());
        }
        _ => panic!("Expected Submit request"),
    }
}

#[test]
fn job_logs_defaults_to_stdout_and_no_tail() {
    let json = r#"{"type":"JobLogs","id":"job-1"}"#;
    let decoded: Request = serde_json::from_str(json).expect("deserialize failed");
    assert_eq!(decoded, Request::JobLogs { id: "job-1".to_string(), stream: LogStream::Stdout, tail: None });
}

#[test]
fn job_logs_accepts_stderr() {
    let json = r#"{"type":"JobLogs","id":"job-1","stream":"stderr","tail":5}"#;
    let decoded: Request = serde_json::from_str(json).expect("deserialize failed");
    assert_eq!(decoded, Request::JobLogs { id: "job-1".to_string(), stream: LogStream::Stderr, tail: Some(5) });
}

#[test]
fn list_jobs_limit_is_optional() {
    let decoded: Request = serde_json::from_str(r#"{"type":"ListJobs"}"#).expect("deserialize failed");
    assert_eq!(decoded, Request::ListJobs { limit: None });
}

#[test]
fn unknown_request_type_is_rejected() {
    assert!(serde_json::from_str::<Request>(r#"{"type":"RunShell","cmd":"rm -rf /"}"#).is_err());
}

#[test]
fn queries_are_classified() {
    assert!(Request::Health.is_query());
    assert!(!Request::Shutdown.is_query());
    assert!(!Request::Submit {
        job_type: String::new(),
        repo_name: String::new(),
        remote_url: String::new(),
        sha: String::new(),
        idempotency_key: None,
    }
    .is_query());
}
