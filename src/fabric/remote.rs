//! Remote command execution over SSH
//!
//! Blocking remote operations with bounded-delay, unbounded-count retry:
//! transient network failures (connection refused, no route, timeout,
//! permission denied while keys propagate) are retried with a fixed delay
//! until they succeed. A permanently unreachable substrate needs operator
//! intervention; there is no retry budget here.

use crate::error::{ForgeError, Result};
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Default delay between retries of a transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(20);

/// Whether an error is a transient substrate condition worth retrying.
pub fn is_transient(err: &ForgeError) -> bool {
    match err {
        ForgeError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::TimedOut
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}

/// Run `op` until it succeeds or fails non-transiently, sleeping `delay`
/// between attempts.
pub async fn retry_transient<T, F, Fut>(what: &str, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                warn!("{} failed (attempt {}): {}; retrying in {:?}", what, attempt, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map ssh/scp stderr onto a transient io error where the text indicates
/// a network condition, so `retry_transient` keeps trying.
fn classify_remote_failure(host: &str, stderr: &str) -> ForgeError {
    let lowered = stderr.to_lowercase();
    let kind = if lowered.contains("connection refused") {
        Some(io::ErrorKind::ConnectionRefused)
    } else if lowered.contains("connection reset") || lowered.contains("connection closed") {
        Some(io::ErrorKind::ConnectionReset)
    } else if lowered.contains("timed out") {
        Some(io::ErrorKind::TimedOut)
    } else if lowered.contains("no route to host") || lowered.contains("network is unreachable") {
        Some(io::ErrorKind::NotConnected)
    } else if lowered.contains("permission denied") {
        Some(io::ErrorKind::PermissionDenied)
    } else {
        None
    };
    match kind {
        Some(kind) => ForgeError::Io(io::Error::new(kind, stderr.trim().to_string())),
        None => ForgeError::Remote { host: host.to_string(), message: stderr.trim().to_string() },
    }
}

fn ssh_base(user: &str, host: &str, key: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "ConnectTimeout=15".to_string(),
    ];
    if let Some(key) = key {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args.push(format!("{}@{}", user, host));
    args
}

/// Execute one command on a remote host, returning stdout.
pub async fn ssh_exec(user: &str, host: &str, key: Option<&Path>, command: &str) -> Result<String> {
    let mut args = ssh_base(user, host, key);
    args.push(command.to_string());

    let output = Command::new("ssh").args(&args).output().await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(classify_remote_failure(host, &String::from_utf8_lossy(&output.stderr)))
    }
}

/// Copy a local file to a remote host.
pub async fn scp_copy(
    user: &str,
    host: &str,
    key: Option<&Path>,
    src: &str,
    dst: &str,
) -> Result<()> {
    let mut args = vec![
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
    ];
    if let Some(key) = key {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args.push(src.to_string());
    args.push(format!("{}@{}:{}", user, host, dst));

    let output = Command::new("scp").args(&args).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(classify_remote_failure(host, &String::from_utf8_lossy(&output.stderr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_classification() {
        let refused = classify_remote_failure("h", "ssh: connect to host h: Connection refused");
        assert!(is_transient(&refused));

        let denied = classify_remote_failure("h", "Permission denied (publickey)");
        assert!(is_transient(&denied));

        let other = classify_remote_failure("h", "bash: no such command");
        assert!(!is_transient(&other));
        assert!(matches!(other, ForgeError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient("test", Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(ForgeError::Io(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "refused",
                    )))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient("test", Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ForgeError::Fabric("bad spec".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
