//! Redundant heartbeat: two nodes on two virtual CAN buses.
//!
//! One bus goes down halfway through; heartbeats keep arriving over the other
//! and every heartbeat is delivered exactly once.
//!
//! Run with:
//!   cargo run --example redundant-heartbeat

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use busprims::schema::{FieldKind, TypeDescriptor, Value};
use busprims::session::{Node, NodeConfig, TypedPublisher, TypedSubscriber};
use busprims::transport::can::{CanTransport, VirtualCanBus};
use busprims::transport::Transport;

const HEARTBEAT_SUBJECT: u16 = 7509;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let heartbeat = Arc::new(
        TypeDescriptor::structure("demo.Heartbeat")
            .field("uptime", FieldKind::uint(32))
            .field("health", FieldKind::uint(2))
            .field("mode", FieldKind::uint(3))
            .field("vendor_specific", FieldKind::uint(19))
            .build()?,
    );

    let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
    let primary = Arc::new(CanTransport::new(bus_a.attach(), Some(1))?);
    let sender = Node::new(
        vec![
            primary.clone() as Arc<dyn Transport>,
            Arc::new(CanTransport::new(bus_b.attach(), Some(1))?),
        ],
        NodeConfig::default(),
    )?;
    let receiver = Node::new(
        vec![
            Arc::new(CanTransport::new(bus_a.attach(), Some(2))?) as Arc<dyn Transport>,
            Arc::new(CanTransport::new(bus_b.attach(), Some(2))?),
        ],
        NodeConfig::default(),
    )?;

    let publisher = TypedPublisher::new(sender.make_publisher(HEARTBEAT_SUBJECT)?, heartbeat.clone());
    let subscriber = TypedSubscriber::new(receiver.make_subscriber(HEARTBEAT_SUBJECT)?, heartbeat);

    for uptime in 0..6u32 {
        if uptime == 3 {
            eprintln!("bus A going down");
            primary.media().set_online(false);
        }
        publisher.publish(&Value::structure([
            ("uptime", Value::from(uptime)),
            ("health", Value::Unsigned(0)),
            ("mode", Value::Unsigned(0)),
            ("vendor_specific", Value::Unsigned(0)),
        ]))?;
        if let Some((value, transfer)) = subscriber.receive(Duration::from_secs(1))? {
            eprintln!(
                "heartbeat from {:?} (transfer {}): uptime {:?}",
                transfer.source_node_id,
                transfer.transfer_id,
                value.get("uptime")
            );
        }
        thread::sleep(Duration::from_millis(100));
    }

    for stats in receiver.statistics() {
        eprintln!(
            "{}: {} frames in, {} transfers",
            stats.descriptor, stats.transport.in_frames, stats.reassembly.transfers
        );
    }
    eprintln!("duplicates discarded: {}", receiver.duplicates_discarded());
    Ok(())
}
