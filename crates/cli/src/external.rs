//! `--fuzzy-cmd`: run an external program as the fuzzy matcher.
//!
//! The program gets the request JSON on stdin and must print a JSON array of
//! proposals on stdout. Anything else (spawn failure, non-zero exit, garbage
//! output) becomes a [`CollaboratorError`]. A program still running after the
//! timeout is killed and the call reports [`CollaboratorError::Cancelled`].

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rappro_recon::fuzzy::parse_proposals;
use rappro_recon::{CollaboratorError, FuzzyMatcher, FuzzyProposal, FuzzyRequest};

pub const DEFAULT_FUZZY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct CommandMatcher {
    program: String,
    timeout: Duration,
}

impl CommandMatcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_FUZZY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl FuzzyMatcher for CommandMatcher {
    fn propose(&self, request: &FuzzyRequest) -> Result<Vec<FuzzyProposal>, CollaboratorError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| CollaboratorError::Unavailable(format!("cannot encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| CollaboratorError::Unavailable(format!("cannot start {}: {e}", self.program)))?;

        // stdin and stdout are pumped on their own threads so a program that
        // echoes its input cannot fill both pipes and stall.
        if let Some(mut stdin) = child.stdin.take() {
            let program = self.program.clone();
            thread::spawn(move || {
                // A program that exits without reading stdin closes the pipe;
                // its stdout still decides the outcome.
                if let Err(e) = stdin.write_all(&payload) {
                    log::debug!("{program}: stdin closed early: {e}");
                }
            });
        }

        let (tx, rx) = mpsc::channel();
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let result = stdout.read_to_end(&mut buf).map(|_| buf);
                let _ = tx.send(result);
            });
        } else {
            let _ = tx.send(Ok(Vec::new()));
        }

        let stdout = match rx.recv_timeout(self.timeout) {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CollaboratorError::Unavailable(format!("{}: {e}", self.program)));
            }
            Err(_) => {
                log::warn!(
                    "{}: no answer after {:?}, killing it",
                    self.program,
                    self.timeout
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(CollaboratorError::Cancelled);
            }
        };

        let status = child
            .wait()
            .map_err(|e| CollaboratorError::Unavailable(format!("{}: {e}", self.program)))?;
        if !status.success() {
            return Err(CollaboratorError::Unavailable(format!(
                "{} exited with {status}",
                self.program
            )));
        }

        parse_proposals(&String::from_utf8_lossy(&stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    fn empty_request() -> FuzzyRequest {
        FuzzyRequest { bank: vec![], accounting: vec![] }
    }

    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn missing_program_is_unavailable() {
        let matcher = CommandMatcher::new("/nonexistent/rappro-fuzzy");
        assert!(matches!(
            matcher.propose(&empty_request()),
            Err(CollaboratorError::Unavailable(_))
        ));
    }

    #[test]
    fn failing_program_is_unavailable() {
        let matcher = CommandMatcher::new("false");
        assert!(matches!(
            matcher.propose(&empty_request()),
            Err(CollaboratorError::Unavailable(_))
        ));
    }

    #[test]
    fn silent_program_proposes_nothing() {
        let matcher = CommandMatcher::new("true");
        assert_eq!(matcher.propose(&empty_request()).unwrap(), Vec::new());
    }

    #[test]
    fn hung_program_is_killed_and_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir, "stuck-matcher.sh", "exec sleep 30");
        let matcher = CommandMatcher::new(program).with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = matcher.propose(&empty_request());
        assert_eq!(result, Err(CollaboratorError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn program_echoing_a_large_request_does_not_stall() {
        let items: Vec<serde_json::Value> = (0..4000)
            .map(|i| {
                serde_json::json!({
                    "id": format!("acc-{i}"),
                    "date": "2024-01-10",
                    "label": "VIREMENT CLIENT REFERENCE 0123456789",
                    "amount": "12.50",
                })
            })
            .collect();
        let request: FuzzyRequest =
            serde_json::from_value(serde_json::json!({ "bank": [], "accounting": items })).unwrap();

        // cat answers with the request object, which is not a proposal array
        let matcher = CommandMatcher::new("cat").with_timeout(Duration::from_secs(20));
        assert!(matches!(
            matcher.propose(&request),
            Err(CollaboratorError::Malformed(_))
        ));
    }
}
