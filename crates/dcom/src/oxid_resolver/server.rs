//! OXID resolver listener
//!
//! Accepts framed ping requests on a TCP port. Each connection runs in its
//! own task; requests from all connections pass through one admission lock
//! and are handled one at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::protocol::*;
use crate::types::{status, Result, SetId};

/// Server-side ping semantics plugged into the listener.
pub trait PingHandler: Send + Sync + 'static {
    /// Refresh a set; returns the reply status
    fn simple_ping(&self, set_id: SetId) -> u32;

    fn complex_ping(&self, request: &ComplexPingRequest) -> ComplexPingReply;
}

/// Running resolver listener
pub struct ResolverListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResolverListener {
    /// Bind and start accepting.
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn PingHandler>,
        max_frame_len: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "OXID resolver listening");

        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, max_frame_len, stop));
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listening socket and every open connection.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "resolver accept loop ended abnormally");
        }
        info!(addr = %self.local_addr, "OXID resolver stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn PingHandler>,
    max_frame_len: usize,
    mut stop: watch::Receiver<bool>,
) {
    let admission = Arc::new(Mutex::new(()));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = stop.changed() => break,

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "resolver accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, "resolver connection accepted");

                let handler = Arc::clone(&handler);
                let admission = Arc::clone(&admission);
                connections.spawn(async move {
                    match serve_connection(stream, handler, admission, max_frame_len).await {
                        Ok(()) => debug!(peer = %peer, "resolver connection closed"),
                        Err(e) => warn!(peer = %peer, error = %e, "resolver connection error"),
                    }
                });
            }

            // reap finished connections so the set does not grow
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn PingHandler>,
    admission: Arc<Mutex<()>>,
    max_frame_len: usize,
) -> Result<()> {
    stream.set_nodelay(true)?;
    while let Some(frame) = Frame::read(&mut stream, max_frame_len).await? {
        let reply = {
            let _admitted = admission.lock().await;
            dispatch(handler.as_ref(), frame)?
        };
        reply.write(&mut stream).await?;
    }
    Ok(())
}

/// Decode a request, run it against the handler, encode the reply.
pub fn dispatch(handler: &dyn PingHandler, frame: Frame) -> Result<Frame> {
    let payload: Bytes = match frame.opnum {
        opnum::SIMPLE_PING => {
            let request = SimplePingRequest::decode(frame.payload)?;
            StatusReply::new(handler.simple_ping(request.set_id)).encode()?
        }
        opnum::COMPLEX_PING => {
            let request = ComplexPingRequest::decode(frame.payload)?;
            handler.complex_ping(&request).encode()?
        }
        opnum::SERVER_ALIVE => StatusReply::new(status::OK).encode()?,
        other => {
            debug!(opnum = other, "unsupported resolver operation");
            StatusReply::new(status::RPC_S_PROCNUM_OUT_OF_RANGE).encode()?
        }
    };
    Ok(Frame::new(frame.opnum, payload))
}
