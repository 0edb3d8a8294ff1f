//! Stdio I/O for the control plane.
//!
//! # Important
//!
//! - **stdout**: the `$ready` line (and whatever else the worker prints)
//! - **stderr**: logs, never parsed by the parent
//! - **Never use `println!`**: it may add `\r\n` on Windows

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use super::ready::ReadyMessage;
use crate::error::{BridgeError, Result};

/// Write a line to stdout.
///
/// Writes the string followed by a single `\n` and flushes, since the parent
/// waits for a complete line.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Write a JSON value to stdout as a single line.
pub fn write_stdout_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}

/// Read a worker's stdout until its `$ready` line.
///
/// Lines that are not ready lines are skipped. A ready line announcing an
/// incompatible protocol is an error.
///
/// # Errors
///
/// [`BridgeError::ConnectionClosed`] if the output ends first.
pub async fn read_ready_line<R>(reader: &mut R) -> Result<ReadyMessage>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(BridgeError::ConnectionClosed);
        }
        match ReadyMessage::parse(&line) {
            Ok(ready) => return Ok(ready),
            Err(BridgeError::Protocol(msg)) if msg.contains("version mismatch") => {
                return Err(BridgeError::Protocol(msg));
            }
            Err(_) => debug!(line = line.trim_end(), "Skipping worker output"),
        }
    }
}
