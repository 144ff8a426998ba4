//! Outbound resolver connections

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::protocol::*;
use crate::types::{status, DcomError, Result, SetId};

/// Opens connections to remote OXID resolvers.
#[async_trait]
pub trait ResolverConnector: Send + Sync + 'static {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn ResolverConnection>>;
}

/// One connection to a remote OXID resolver.
#[async_trait]
pub trait ResolverConnection: Send + Sync {
    /// Send a simple ping, returning the reply status
    async fn simple_ping(&self, set_id: SetId) -> Result<u32>;

    /// Send a complex ping
    async fn complex_ping(&self, request: ComplexPingRequest) -> Result<ComplexPingReply>;

    /// Check that the resolver answers
    async fn server_alive(&self) -> Result<bool>;

    /// Release the connection. Later calls fail as unreachable.
    fn close(&self) {}
}

/// Connector for the framed TCP transport served by
/// [`super::ResolverListener`]
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
    max_frame_len: usize,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_frame_len: 64 * 1024,
        }
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ResolverConnector for TcpConnector {
    async fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn ResolverConnection>> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DcomError::Unreachable {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(DcomError::Timeout(addr)),
        };
        stream.set_nodelay(true)?;
        debug!(remote = %addr, "resolver connection opened");
        Ok(Arc::new(TcpResolverConnection {
            addr,
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
            timeout: self.timeout,
            max_frame_len: self.max_frame_len,
        }))
    }
}

/// Request/reply exchange over one TCP stream, one call at a time
pub struct TcpResolverConnection {
    addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
    timeout: Duration,
    max_frame_len: usize,
}

impl TcpResolverConnection {
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn call(&self, opnum: u16, payload: Bytes) -> Result<Bytes> {
        let unreachable = |reason: &str| DcomError::Unreachable {
            addr: self.addr,
            reason: reason.to_string(),
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(unreachable("connection closed"));
        }
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| unreachable("connection closed"))?;

        let exchange = async {
            Frame::new(opnum, payload).write(&mut *stream).await?;
            Frame::read(&mut *stream, self.max_frame_len).await
        };
        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(frame))) if frame.opnum == opnum => Ok(frame.payload),
            Ok(Ok(Some(frame))) => Err(DcomError::InvalidFrame(format!(
                "reply opnum {} does not match request opnum {}",
                frame.opnum, opnum
            ))),
            Ok(Ok(None)) => Err(unreachable("connection closed by peer")),
            Ok(Err(DcomError::Io(e))) => Err(unreachable(&e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DcomError::Timeout(self.addr)),
        };
        if result.is_err() {
            // stream position is unknown after a failed exchange
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl ResolverConnection for TcpResolverConnection {
    async fn simple_ping(&self, set_id: SetId) -> Result<u32> {
        let reply = self
            .call(opnum::SIMPLE_PING, SimplePingRequest::new(set_id).encode()?)
            .await?;
        Ok(StatusReply::decode(reply)?.status)
    }

    async fn complex_ping(&self, request: ComplexPingRequest) -> Result<ComplexPingReply> {
        let reply = self.call(opnum::COMPLEX_PING, request.encode()?).await?;
        ComplexPingReply::decode(reply)
    }

    async fn server_alive(&self) -> Result<bool> {
        let reply = self.call(opnum::SERVER_ALIVE, Bytes::new()).await?;
        Ok(StatusReply::decode(reply)?.status == status::OK)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // an in-flight call drops the stream itself when it fails
        if let Ok(mut guard) = self.stream.try_lock() {
            guard.take();
        }
        debug!(remote = %self.addr, "resolver connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(Duration::from_secs(2));
        match connector.connect(addr).await {
            Err(e) => assert!(e.is_transient(), "unexpected error: {e}"),
            Ok(_) => panic!("connect to a closed port succeeded"),
        }
    }
}
