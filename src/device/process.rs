//! Child processes that stream their output back to the scheduler

use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{OutputCallback, TargetError};

/// Expand `{name}` placeholders in an argument template.
///
/// `{artifacts}` standing alone expands to one argument per artifact;
/// anywhere else it joins them with spaces.
pub fn expand_template(args: &[String], vars: &HashMap<&str, String>, artifacts: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(args.len() + artifacts.len());
    for arg in args {
        if arg == "{artifacts}" {
            expanded.extend(artifacts.iter().cloned());
            continue;
        }

        let mut value = arg.replace("{artifacts}", &artifacts.join(" "));
        for (name, replacement) in vars {
            value = value.replace(&format!("{{{}}}", name), replacement);
        }
        expanded.push(value);
    }
    expanded
}

/// Run `program`, handing each stdout line to `on_output` as it arrives.
///
/// Returns whether the process exited successfully. Cancellation kills the
/// child and returns `Ok(false)`.
pub async fn stream_process(
    program: &str,
    args: &[String],
    on_output: OutputCallback<'_>,
    cancel: &CancellationToken,
) -> Result<bool, TargetError> {
    debug!("Spawning {} {}", program, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                TargetError::Configuration(format!("cannot start {}: {}", program, e))
            }
            _ => TargetError::Initialization(format!("cannot start {}: {}", program, e)),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let pump = async {
        let forward_stdout = async {
            if let Some(stdout) = stdout {
                read_lines(stdout, |line| on_output(line)).await;
            }
        };
        let forward_stderr = async {
            if let Some(stderr) = stderr {
                read_lines(stderr, |line| debug!("{}: {}", program, line.trim_end())).await;
            }
        };
        tokio::join!(forward_stdout, forward_stderr);
        child.wait().await
    };

    let status = tokio::select! {
        status = pump => Some(status),
        _ = cancel.cancelled() => None,
    };

    match status {
        Some(status) => {
            let status = status.map_err(|e| TargetError::Communication(e.to_string()))?;
            if !status.success() {
                debug!("{} exited with {}", program, status);
            }
            Ok(status.success())
        }
        None => {
            debug!("Cancelling {}", program);
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill {}: {}", program, e);
            }
            Ok(false)
        }
    }
}

async fn read_lines<R, F>(reader: R, mut handle: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => handle(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_expand_template() {
        let mut vars = HashMap::new();
        vars.insert("port", "/dev/ttyUSB0".to_string());
        vars.insert("run_id", "0badc0de".to_string());

        let args: Vec<String> = ["--port={port}", "{artifacts}", "--id", "{run_id}"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let artifacts = vec!["a.pe".to_string(), "b.pe".to_string()];

        assert_eq!(
            expand_template(&args, &vars, &artifacts),
            vec!["--port=/dev/ttyUSB0", "a.pe", "b.pe", "--id", "0badc0de"]
        );
    }

    #[test]
    fn test_expand_template_inline_artifacts() {
        let args = vec!["--load={artifacts}".to_string()];
        let artifacts = vec!["a.pe".to_string(), "b.pe".to_string()];
        assert_eq!(expand_template(&args, &HashMap::new(), &artifacts), vec!["--load=a.pe b.pe"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_process_forwards_lines() {
        let lines = Mutex::new(Vec::new());
        let on_output = |s: &str| lines.lock().unwrap().push(s.to_string());
        let args = vec!["-c".to_string(), "echo one; echo two >&2; echo three".to_string()];

        let ok = stream_process("sh", &args, &on_output, &CancellationToken::new())
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(*lines.lock().unwrap(), vec!["one\n", "three\n"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_process_reports_failure() {
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let ok = stream_process("sh", &args, &|_: &str| {}, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_process_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let started = std::time::Instant::now();
        let ok = stream_process("sh", &args, &|_: &str| {}, &cancel).await.unwrap();

        assert!(!ok);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_configuration_error() {
        let err = stream_process("devrunner-no-such-engine", &[], &|_: &str| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Configuration(_)));
    }
}
