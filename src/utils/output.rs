/// Pipe pumping for a spawned child
///
/// stdin is written and stdout/stderr are drained on their own threads, so a
/// child that fills one pipe while we block on another cannot deadlock the
/// call. Output is read to EOF; the wall-clock watchdog bounds how long that
/// takes.
use crate::config::types::{JailError, Result};
use log::debug;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::thread;

/// Everything the child produced.
#[derive(Debug)]
pub struct Communicated {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
}

/// Feed `stdin`, read both output streams to EOF and reap the child.
pub fn communicate(child: &mut Child, stdin: Option<Vec<u8>>) -> Result<Communicated> {
    let writer = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(data)) => Some(thread::spawn(move || {
            if let Err(e) = pipe.write_all(&data) {
                // The child may exit or close stdin without reading it all.
                if e.kind() != ErrorKind::BrokenPipe {
                    debug!("Writing child stdin failed: {}", e);
                }
            }
            // pipe dropped here: child sees EOF
        })),
        // No input: dropping the pipe closes it.
        _ => None,
    };

    let stdout_reader = child.stdout.take().map(|s| thread::spawn(move || read_to_eof(s)));
    let stderr_reader = child.stderr.take().map(|s| thread::spawn(move || read_to_eof(s)));

    let stdout = join_reader(stdout_reader)?;
    let stderr = join_reader(stderr_reader)?;
    if let Some(handle) = writer {
        let _ = handle.join();
    }

    let status = child.wait()?;
    Ok(Communicated {
        stdout,
        stderr,
        status,
    })
}

fn read_to_eof<R: Read>(mut stream: R) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Reading child output stopped: {}", e);
                break;
            }
        }
    }
    out
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Result<Vec<u8>> {
    match handle {
        Some(h) => h
            .join()
            .map_err(|_| JailError::Process("output reader thread panicked".to_string())),
        None => Ok(Vec::new()),
    }
}

/// Exit code, or the negated signal number when the child was killed.
pub fn exit_status_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}
