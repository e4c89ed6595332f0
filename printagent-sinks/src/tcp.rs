use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use printagent_job_queue::{PrintOutcome, PrintSink};

use crate::error::SinkError;

/// Raw port used by most label printers.
pub const RAW_PORT: u16 = 9100;

/// Streams the payload to `host[:port]` over a plain TCP connection.
#[derive(Debug, Clone)]
pub struct TcpSink {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl Default for TcpSink {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }
}

impl TcpSink {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }

    fn resolve(target: &str) -> Result<Vec<SocketAddr>, SinkError> {
        let host = target.strip_prefix("tcp://").unwrap_or(target).trim_end_matches('/');
        if host.is_empty() {
            return Err(SinkError::InvalidTarget {
                target: target.to_owned(),
                reason: "missing host".to_owned(),
            });
        }
        let with_port = if has_port(host) {
            host.to_owned()
        } else {
            format!("{host}:{RAW_PORT}")
        };
        let addrs: Vec<_> = with_port.to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(SinkError::InvalidTarget {
                target: target.to_owned(),
                reason: "host did not resolve".to_owned(),
            });
        }
        Ok(addrs)
    }

    fn send(&self, target: &str, payload: &[u8]) -> Result<SocketAddr, SinkError> {
        let mut last_err = None;
        for addr in Self::resolve(target)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(mut stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.write_all(payload)?;
                    stream.flush()?;
                    // Best effort; some printers close first.
                    let _ = stream.shutdown(Shutdown::Write);
                    return Ok(addr);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(SinkError::Io)
            .unwrap_or_else(|| SinkError::InvalidTarget {
                target: target.to_owned(),
                reason: "no address reachable".to_owned(),
            }))
    }
}

/// `host:port` or `[v6]:port`, as opposed to a bare host or bare IPv6 literal.
fn has_port(host: &str) -> bool {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.contains("]:");
    }
    host.matches(':').count() == 1
}

impl PrintSink for TcpSink {
    fn name(&self) -> &str {
        "tcp"
    }

    fn print(&self, printer: &str, payload: &[u8]) -> PrintOutcome {
        match self.send(printer, payload) {
            Ok(addr) => {
                tracing::debug!(%addr, bytes = payload.len(), "raw print sent");
                PrintOutcome::ok(format!("Printed via {printer}"))
            }
            Err(e) => PrintOutcome::failed(format!("Print error: {e}")),
        }
    }
}
