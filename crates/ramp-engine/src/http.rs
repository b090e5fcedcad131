use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use ramp_core::{EngineError, EngineResult, Generation};

use crate::protocol::StreamAssembler;

/// Timeout for metadata calls (listing, show, unload).
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

pub fn agent(connect_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .build()
}

fn is_timeout_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("timed out") || msg.contains("timeout")
}

/// Connection and DNS failures mean the engine is down, not that the model
/// failed.
pub fn map_error(err: ureq::Error, timeout: Duration) -> EngineError {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            EngineError::Rejected(format!("HTTP {code}: {}", body.trim()))
        }
        ureq::Error::Transport(t) => match t.kind() {
            ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
                EngineError::Unreachable(t.to_string())
            }
            _ if is_timeout_message(&t.to_string()) => EngineError::Timeout(timeout),
            _ => EngineError::Protocol(t.to_string()),
        },
    }
}

fn map_io(err: std::io::Error, timeout: Duration) -> EngineError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            EngineError::Timeout(timeout)
        }
        _ if is_timeout_message(&err.to_string()) => EngineError::Timeout(timeout),
        _ => EngineError::Protocol(format!("stream interrupted: {err}")),
    }
}

/// Line framing shared by NDJSON and SSE streams.
#[derive(Debug, Clone, Copy)]
pub enum Framing {
    Ndjson,
    Sse,
}

/// Reads a streamed response to completion, timing from `started`.
pub fn read_stream(
    resp: ureq::Response,
    framing: Framing,
    started: Instant,
    timeout: Duration,
) -> EngineResult<Generation> {
    let reader = BufReader::new(resp.into_reader());
    let mut assembler = StreamAssembler::new();

    for line in reader.lines() {
        let line = line.map_err(|e| map_io(e, timeout))?;
        let elapsed = started.elapsed();
        if elapsed > timeout {
            return Err(EngineError::Timeout(timeout));
        }
        match framing {
            Framing::Ndjson => assembler.push_ollama(&line, elapsed)?,
            Framing::Sse => assembler.push_sse(&line, elapsed)?,
        }
        if assembler.is_done() && matches!(framing, Framing::Ndjson) {
            break;
        }
    }

    if !assembler.is_done() {
        return Err(EngineError::Protocol("stream ended before completion".into()));
    }
    Ok(assembler.finish(started.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let t = Duration::from_secs(300);
        let err = map_io(std::io::Error::new(std::io::ErrorKind::TimedOut, "x"), t);
        assert_eq!(err, EngineError::Timeout(t));
        let err = map_io(std::io::Error::other("connection reset"), t);
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        // Port 9 (discard) is closed on any sane test host.
        let err = agent(Duration::from_secs(2))
            .get("http://127.0.0.1:9/api/tags")
            .call()
            .unwrap_err();
        assert!(matches!(
            map_error(err, METADATA_TIMEOUT),
            EngineError::Unreachable(_)
        ));
    }
}
