//! Subprocess-based execution of user handler code.
//!
//! A handler is run out-of-process: its source is written to a temp module
//! file, a small harness script imports it, feeds it the parsed input on
//! stdin, and reports its outcome as line-delimited JSON on stdout. Each line
//! is one of:
//!   {"type": "stream", "data": <value>}   -- an intermediate value
//!   {"type": "end", "data": <value>}      -- the final returned value
//!   {"type": "error", "message": <string>} -- a thrown error
//!
//! This lets the executor tell a single-value ("request-style") handler
//! apart from a streaming one without parsing the handler's source: the
//! harness emits `stream` lines only when the handler returns something
//! iterable.
//!
//! The handler is called as `handler(input, ctx)`. `ctx.run(cmd, args)` is
//! the only capability the harness exposes for spawning subcommands, and it
//! checks `cmd` against the Function's `run` permission before doing so --
//! this is the one permission enforced by the harness itself rather than the
//! host OS, since the executor only ever spawns the harness process, not the
//! subcommands a handler asks it to run.

use edgerun_core::{AppError, AppResult, Permissions};
use futures_util::StreamExt;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Stdout lines longer than this are treated as a misbehaving handler
/// rather than read into memory without bound.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const HARNESS_JS: &str = r#"
import { pathToFileURL } from 'node:url';
import { execFile } from 'node:child_process';
import { promisify } from 'node:util';

const [, , handlerPath] = process.argv;
const execFileAsync = promisify(execFile);
const allowedRun = JSON.parse(process.env.EDGERUN_ALLOWED_RUN || '[]');

function emit(obj) {
  process.stdout.write(JSON.stringify(obj) + '\n');
}

function readStdin() {
  return new Promise((resolve, reject) => {
    let data = '';
    process.stdin.setEncoding('utf8');
    process.stdin.on('data', (chunk) => { data += chunk; });
    process.stdin.on('end', () => resolve(data));
    process.stdin.on('error', reject);
  });
}

async function run(cmd, args = []) {
  if (!allowedRun.includes(cmd)) {
    throw new Error(`command '${cmd}' is not in the run allow-list`);
  }
  const { stdout } = await execFileAsync(cmd, args);
  return stdout;
}

const ctx = { run };

try {
  const mod = await import(pathToFileURL(handlerPath).href);
  const handler = mod.default;
  const raw = await readStdin();
  const input = raw.length ? JSON.parse(raw) : {};
  const result = handler(input, ctx);

  if (result && typeof result.next === 'function' && typeof result[Symbol.asyncIterator] === 'function') {
    let final = null;
    for await (const value of result) {
      emit({ type: 'stream', data: value });
      final = value;
    }
    emit({ type: 'end', data: final });
  } else {
    const value = await result;
    emit({ type: 'end', data: value });
  }
} catch (err) {
  emit({ type: 'error', message: err && err.message ? err.message : String(err) });
}
"#;

/// Runs `code` against `input` with the given `permissions`, sending every
/// intermediate value the handler yields on `stream_tx` as it arrives, and
/// returning its final value. Enforces `timeout` around the whole
/// invocation. `stream_tx` lets the caller persist each streamed value (e.g.
/// as a trace record) concurrently with the handler still running.
pub async fn execute(
    runtime_command: &str,
    code: &str,
    input: Value,
    permissions: &Permissions,
    timeout: Duration,
    stream_tx: tokio::sync::mpsc::UnboundedSender<Value>,
) -> AppResult<Value> {
    let workdir = tempfile::tempdir()
        .map_err(|e| AppError::Internal(format!("failed to create sandbox workdir: {e}")))?;
    let handler_path = workdir.path().join("handler.mjs");
    let harness_path = workdir.path().join("harness.mjs");

    tokio::fs::write(&handler_path, code)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write handler source: {e}")))?;
    tokio::fs::write(&harness_path, HARNESS_JS)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write sandbox harness: {e}")))?;

    let mut command = Command::new(runtime_command);
    command
        .arg(&harness_path)
        .arg(&handler_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env_clear();

    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
    for (key, value) in crate::permissions::allowed_env_vars(permissions) {
        command.env(key, value);
    }
    command.env(
        "EDGERUN_ALLOWED_RUN",
        crate::permissions::run_allowlist_json(permissions),
    );

    #[cfg(target_os = "linux")]
    {
        let permissions = permissions.clone();
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(move || {
                crate::permissions::restrict_child_filesystem(&permissions);
                Ok(())
            });
        }
    }

    let mut child = command
        .spawn()
        .map_err(|e| AppError::HandlerError(format!("failed to spawn sandbox process: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Internal("sandbox child has no stdin".to_string()))?;
    let input_bytes = serde_json::to_vec(&input)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Internal("sandbox child has no stdout".to_string()))?;
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    let run = async {
        stdin
            .write_all(&input_bytes)
            .await
            .map_err(|e| AppError::HandlerError(format!("failed to write handler input: {e}")))?;
        drop(stdin);

        let mut final_value: Option<Value> = None;
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| match e {
                LinesCodecError::MaxLineLengthExceeded => AppError::HandlerError(
                    "handler emitted an oversized output line".to_string(),
                ),
                LinesCodecError::Io(e) => {
                    AppError::HandlerError(format!("failed to read handler output: {e}"))
                }
            })?;
            let event: Value = serde_json::from_str(&line)?;
            match event.get("type").and_then(|t| t.as_str()) {
                Some("stream") => {
                    let _ = stream_tx.send(event.get("data").cloned().unwrap_or(Value::Null));
                }
                Some("end") => {
                    final_value = Some(event.get("data").cloned().unwrap_or(Value::Null));
                }
                Some("error") => {
                    return Err(AppError::HandlerError(
                        event
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("handler error")
                            .to_string(),
                    ));
                }
                _ => {}
            }
        }

        final_value
            .ok_or_else(|| AppError::HandlerError("handler exited without a result".to_string()))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok(value)) => {
            let _ = child.wait().await;
            Ok(value)
        }
        Ok(Err(err)) => {
            // the handler errored without necessarily exiting (e.g. an oversized
            // stdout line, or a parse failure mid-stream) -- don't wait on it
            let _ = child.kill().await;
            Err(err)
        }
        Err(_elapsed) => {
            let _ = child.kill().await;
            Err(AppError::Timeout(timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_protocol_lines_parse_as_expected() {
        let stream_line = r#"{"type":"stream","data":1}"#;
        let end_line = r#"{"type":"end","data":{"ok":true}}"#;
        let error_line = r#"{"type":"error","message":"boom"}"#;

        let parsed: Value = serde_json::from_str(stream_line).unwrap();
        assert_eq!(parsed["type"], "stream");

        let parsed: Value = serde_json::from_str(end_line).unwrap();
        assert_eq!(parsed["data"]["ok"], true);

        let parsed: Value = serde_json::from_str(error_line).unwrap();
        assert_eq!(parsed["message"], "boom");
    }

    #[tokio::test]
    async fn oversized_line_without_a_newline_is_rejected_not_buffered_forever() {
        let mut data = vec![b'x'; MAX_LINE_BYTES + 1];
        data.push(b'\n');
        let mut lines = FramedRead::new(data.as_slice(), LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let err = lines.next().await.unwrap().unwrap_err();
        assert!(matches!(err, LinesCodecError::MaxLineLengthExceeded));
    }
}
