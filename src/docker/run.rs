use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ExitStatus};
use std::sync::mpsc::{self, Sender};

use anyhow::{Context, Result};

use super::types::OutputLine;

/// Drain a child's stdout and stderr line by line until both close, then reap it.
///
/// Lines from the two pipes are handed to `on_line` in arrival order. Neither
/// pipe can stall the other: each has its own reader thread.
pub fn drain_child(mut child: Child, on_line: &mut dyn FnMut(OutputLine)) -> Result<ExitStatus> {
    let stdout = child.stdout.take().context("child stdout was not piped")?;
    let stderr = child.stderr.take().context("child stderr was not piped")?;

    let (tx, rx) = mpsc::channel();
    let out_handle = spawn_reader(stdout, tx.clone(), OutputLine::Stdout);
    let err_handle = spawn_reader(stderr, tx, OutputLine::Stderr);

    // Ends once both readers have dropped their senders.
    for line in rx {
        on_line(line);
    }

    let _ = out_handle.join();
    let _ = err_handle.join();
    child.wait().context("failed to wait for docker process")
}

fn spawn_reader<R>(
    pipe: R,
    tx: Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> std::thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    // Receiver may be gone; keep draining so the child never blocks.
                    let _ = tx.send(wrap(line));
                }
            }
        }
    })
}
