//! Client backend for the HTTP-addressable GPIO simulator.
//!
//! The simulator is a small localhost web service exposing pin and ADC
//! state. One short-lived connection per operation keeps the client free
//! of connection-pool state; the simulator is a development collaborator,
//! not a production transport.
//!
//! Failure policy: a failed digital read returns level 0, the fail-safe
//! direction for every input in this machine (interlock open, button
//! released, limit clear), and logs a warning. Output writes are
//! best-effort. Analog reads propagate errors because the caller must
//! distinguish a missing channel.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::clock::MonotonicClock;
use crate::ReadError;

const IO_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct LevelBody {
    level: u8,
}

#[derive(Debug, Deserialize)]
struct AnalogBody {
    value: u16,
}

struct HttpInner {
    addr: String,
}

/// GPIO backend talking to the HTTP simulator.
#[derive(Clone)]
pub struct HttpSimGpio {
    inner: Arc<HttpInner>,
    clock: MonotonicClock,
}

impl HttpSimGpio {
    /// Connect-check the simulator and build the backend.
    pub fn connect(addr: &str) -> std::io::Result<Self> {
        let gpio = Self {
            inner: Arc::new(HttpInner {
                addr: addr.to_string(),
            }),
            clock: MonotonicClock::new(),
        };
        // One probe request up front so a dead simulator fails startup
        // instead of the first motion segment.
        gpio.request("GET", "/health", None)?;
        Ok(gpio)
    }

    pub fn read_digital(&self, pin: u8) -> u8 {
        match self.request("GET", &format!("/pins/{pin}"), None) {
            Ok((200, body)) => serde_json::from_str::<LevelBody>(&body)
                .map(|b| (b.level != 0) as u8)
                .unwrap_or_else(|e| {
                    warn!(pin, error = %e, "malformed simulator pin response");
                    0
                }),
            Ok((status, _)) => {
                warn!(pin, status, "simulator rejected pin read");
                0
            }
            Err(e) => {
                warn!(pin, error = %e, "simulator pin read failed");
                0
            }
        }
    }

    pub fn write_digital(&self, pin: u8, level: u8) {
        let body = format!("{{\"level\":{}}}", (level != 0) as u8);
        if let Err(e) = self.request("POST", &format!("/pins/{pin}"), Some(&body)) {
            warn!(pin, level, error = %e, "simulator pin write failed");
        }
    }

    pub fn read_analog(&self, channel: u8) -> Result<u16, ReadError> {
        match self.request("GET", &format!("/adc/{channel}"), None) {
            Ok((200, body)) => serde_json::from_str::<AnalogBody>(&body)
                .map(|b| b.value.min(1023))
                .map_err(|_| ReadError::NoSuchChannel(channel)),
            Ok((404, _)) => Err(ReadError::NoSuchChannel(channel)),
            Ok((status, _)) => {
                warn!(channel, status, "simulator rejected analog read");
                Err(ReadError::NoSuchChannel(channel))
            }
            Err(e) => {
                warn!(channel, error = %e, "simulator analog read failed");
                Err(ReadError::NoSuchChannel(channel))
            }
        }
    }

    #[inline]
    pub fn now_micros(&self) -> u64 {
        self.clock.now_micros()
    }

    /// One request/response exchange. Returns (status, body).
    fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> std::io::Result<(u16, String)> {
        let mut stream = TcpStream::connect(&self.inner.addr)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let payload = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            self.inner.addr,
            payload.len(),
        );
        stream.write_all(request.as_bytes())?;

        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        parse_response(&response)
    }
}

impl std::fmt::Debug for HttpSimGpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSimGpio")
            .field("addr", &self.inner.addr)
            .finish()
    }
}

fn parse_response(response: &str) -> std::io::Result<(u16, String)> {
    let mut lines = response.split("\r\n");
    let status_line = lines.next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad status line: {status_line:?}"),
            )
        })?;
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn parse_response_splits_status_and_body() {
        let (status, body) =
            parse_response("HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n{\"level\":1}").unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "{\"level\":1}");

        let (status, body) = parse_response("HTTP/1.1 404 Not Found\r\n\r\n").unwrap();
        assert_eq!(status, 404);
        assert!(body.is_empty());
    }

    #[test]
    fn parse_response_rejects_garbage() {
        assert!(parse_response("not http").is_err());
    }

    #[test]
    fn connect_fails_without_simulator() {
        // Bind-then-drop gives a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(HttpSimGpio::connect(&format!("127.0.0.1:{port}")).is_err());
    }

    #[test]
    fn exchanges_with_a_stub_simulator() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            // First request is the connect probe, second the pin read.
            for body in ["{}", "{\"level\":1}"] {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).unwrap();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });

        let gpio = HttpSimGpio::connect(&addr).unwrap();
        assert_eq!(gpio.read_digital(13), 1);
        server.join().unwrap();
    }
}
