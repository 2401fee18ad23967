//! TCP connection shared by the INDI and PHD2 clients.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Connect to the first address of `addr` that accepts.
///
/// `localhost` commonly resolves to `::1` before `127.0.0.1` while the
/// servers only listen on IPv4, so every resolved address is tried in turn.
/// Fails with the last connection error if none accepts.
pub(crate) fn connect_any<A: ToSocketAddrs>(addr: A, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connecting to {socket_addr} failed: {e}");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpListener};

    fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_falls_through_to_listening_address() {
        let refused = closed_port();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap();

        let stream = connect_any(&[refused, live][..], Duration::from_secs(1)).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);
    }

    #[test]
    fn test_reports_last_error_when_nothing_accepts() {
        let err = connect_any(&[closed_port(), closed_port()][..], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

        let nothing: &[SocketAddr] = &[];
        let err = connect_any(nothing, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
