//! IObjectExporter ping service (MS-DCOM 3.1.2.5)
//!
//! The resolver listener serves the garbage-collection half of
//! IObjectExporter:
//! - SimplePing / ComplexPing keep exported objects alive
//! - ServerAlive answers health checks
//!
//! Outbound pings to other resolvers go through [`ResolverConnector`].

mod client;
mod protocol;
mod server;

pub use client::*;
pub use protocol::*;
pub use server::*;
