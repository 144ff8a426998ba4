//! Ping round trip
//!
//! Starts two registries in one process. The exporter hands out an
//! interface pointer inside an NDR reply; the importer decodes it, pings the
//! exporter's resolver, and later releases the reference so the exporter
//! sweeps the object.
//!
//! Run with: cargo run -p ping-roundtrip -- --ping-ms 500 --expiry-ms 2000

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dcom::{LocalObject, Registry, RegistryConfig, SessionId, SystemClock, TcpConnector};
use dcom_ndr::{decode_params, encode_params, DecodeContext, Flags, NdrReader, TypeDescriptor, Value};

struct Greeter;

impl LocalObject for Greeter {}

#[derive(Parser)]
#[command(name = "ping-roundtrip")]
#[command(about = "Keep a remote object alive with DCOM pings")]
struct Args {
    /// Outbound ping period in milliseconds
    #[arg(long, default_value = "500")]
    ping_ms: u64,

    /// Expiry window in milliseconds
    #[arg(long, default_value = "2000")]
    expiry_ms: u64,

    /// How long the importer holds the reference, in expiry windows
    #[arg(long, default_value = "3")]
    hold_windows: u32,
}

fn registry(args: &Args) -> Registry {
    let config = RegistryConfig::default()
        .with_ping_interval(Duration::from_millis(args.ping_ms))
        .with_sweep_interval(Duration::from_millis(args.ping_ms))
        .with_expiry_window(Duration::from_millis(args.expiry_ms))
        .with_sweep_enabled(true);
    Registry::new(config, Arc::new(SystemClock), Arc::new(TcpConnector::default()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let exporter = registry(&args);
    let importer = registry(&args);
    info!("exporter resolver on {}", exporter.start().await?);
    info!("importer resolver on {}", importer.start().await?);

    let ptr = exporter.export(SessionId::next(), Arc::new(Greeter))?;
    let mut interrupted = exporter
        .interrupt_signal(&ptr.oid)
        .ok_or("export vanished before it was sent")?;
    info!(oid = %ptr.oid, oxid = %ptr.oxid, ipid = %ptr.ipid, "exported greeter");

    let reply = encode_params(
        &[(TypeDescriptor::InterfacePointer, Value::InterfacePointer(ptr))],
        Flags::NONE,
    )?;
    info!("reply payload is {} bytes", reply.len());

    let mut ctx = DecodeContext::new();
    decode_params(
        &[TypeDescriptor::InterfacePointer],
        &mut NdrReader::new(reply),
        Flags::NONE,
        &mut ctx,
    )?;
    let session = SessionId::next();
    importer.import(session, IpAddr::V4(Ipv4Addr::LOCALHOST), &ctx);

    let window = exporter.config().expiry_window;
    tokio::time::sleep(window * args.hold_windows).await;
    info!(
        alive = exporter.resolve_by_oid(&ptr.oid).is_some(),
        "after {} expiry windows of pinging",
        args.hold_windows
    );

    importer.release_reference(session, ptr.oid)?;
    info!("importer released its reference; waiting for the sweep");
    tokio::time::timeout(window * 4, interrupted.wait_for(|fired| *fired)).await??;
    info!(alive = exporter.resolve_by_oid(&ptr.oid).is_some(), "greeter swept");

    importer.shutdown().await;
    exporter.shutdown().await;
    Ok(())
}
