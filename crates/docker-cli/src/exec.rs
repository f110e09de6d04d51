use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::{Error, Result};

/// Run `program` with `args` and return its combined output (stdout, then stderr).
///
/// Fails with [`Error::Command`] on a non-zero exit. If `timeout` elapses the
/// child is killed and reaped before [`Error::Timeout`] is returned.
pub async fn run(program: &str, args: &[String], timeout: Duration) -> Result<String> {
    let command = render(program, args);
    tracing::debug!(%command, "exec");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;

    let mut stdout = tokio::spawn(drain(child.stdout.take()));
    let mut stderr = tokio::spawn(drain(child.stderr.take()));

    // One deadline covers the exit and both pipes: a background descendant
    // can hold a pipe open after the direct child exits.
    let finished = tokio::time::timeout(timeout, async {
        let status = child.wait().await;
        let out = (&mut stdout).await.unwrap_or_default();
        let err = (&mut stderr).await.unwrap_or_default();
        (status, out, err)
    })
    .await;

    let (status, mut output, err) = match finished {
        Ok(collected) => collected,
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(%command, error = %e, "failed to kill timed out process");
            }
            stdout.abort();
            stderr.abort();
            tracing::warn!(%command, ?timeout, "command timed out");
            return Err(Error::Timeout { command, timeout });
        }
    };
    let status = status.map_err(|source| Error::Spawn {
        command: command.clone(),
        source,
    })?;
    output.extend(err);
    let output = String::from_utf8_lossy(&output).into_owned();

    if !status.success() {
        return Err(Error::Command {
            command,
            exit_code: status.code(),
            output,
        });
    }

    Ok(output)
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

fn render(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn captures_stdout_then_stderr() {
        let out = run("sh", &sh("echo out; echo err >&2"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "out\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_output() {
        let err = run("sh", &sh("echo boom; exit 3"), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            Error::Command {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(output, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = std::time::Instant::now();
        let err = run("sh", &sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn deadline_covers_pipes_held_by_background_children() {
        let started = std::time::Instant::now();
        let err = run("sh", &sh("sleep 6 & echo hi"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run("/nonexistent/vpsdeck-bin", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn render_joins_program_and_args() {
        assert_eq!(
            render("docker", &["pause".into(), "vps_1".into()]),
            "docker pause vps_1"
        );
    }
}
