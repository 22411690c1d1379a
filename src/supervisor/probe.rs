//! TCP port occupancy probe.

use std::time::Duration;

use tokio::net::TcpStream;

/// Connect timeout used by [`is_occupied`].
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Report whether anything accepts TCP connections on `host:port`.
///
/// A successful connect means occupied. Refusal, timeout or any other
/// connect failure means free. Makes a single attempt.
pub async fn is_occupied(host: &str, port: u16) -> bool {
    is_occupied_within(host, port, PROBE_TIMEOUT).await
}

/// Like [`is_occupied`] with an explicit connect timeout.
pub async fn is_occupied_within(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            tracing::trace!(host, port, error = %e, "Port probe connect failed");
            false
        }
        Err(_) => {
            tracing::trace!(host, port, "Port probe timed out");
            false
        }
    }
}
