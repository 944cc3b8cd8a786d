use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use busprims::session::{Node, NodeConfig};
use busprims::transport::can::{CanTransport, VirtualCanBus, VirtualCanInterface};
use busprims::transport::{Frame, ProtocolParameters, StatisticsSnapshot, Transport};
use busprims::transport::{NodeId, Result};

const WAIT: Duration = Duration::from_secs(2);

/// Transport wrapper that loses or delays inbound frames.
struct Impaired {
    inner: Arc<dyn Transport>,
    delay: Duration,
    lose: fn(&Frame) -> bool,
    lost: AtomicU64,
}

impl Impaired {
    fn new(inner: Arc<dyn Transport>, delay: Duration, lose: fn(&Frame) -> bool) -> Self {
        Self {
            inner,
            delay,
            lose,
            lost: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for Impaired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Impaired")
            .field("inner", &self.inner)
            .field("delay", &self.delay)
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish()
    }
}

impl Transport for Impaired {
    fn send(&self, frame: &Frame, deadline: Instant) -> Result<()> {
        self.inner.send(frame, deadline)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<Frame>> {
        let Some(frame) = self.inner.poll(timeout)? else {
            return Ok(None);
        };
        if (self.lose)(&frame) {
            self.lost.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        thread::sleep(self.delay);
        Ok(Some(frame))
    }

    fn max_frame_payload_size(&self) -> usize {
        self.inner.max_frame_payload_size()
    }

    fn frame_overhead(&self) -> usize {
        self.inner.frame_overhead()
    }

    fn protocol_parameters(&self) -> ProtocolParameters {
        self.inner.protocol_parameters()
    }

    fn local_node_id(&self) -> Option<NodeId> {
        self.inner.local_node_id()
    }

    fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics()
    }

    fn close(&self) {
        self.inner.close();
    }

    fn descriptor(&self) -> String {
        format!("impaired({})", self.inner.descriptor())
    }
}

fn can(bus: &VirtualCanBus, id: NodeId) -> Arc<CanTransport<VirtualCanInterface>> {
    Arc::new(CanTransport::new(bus.attach(), Some(id)).expect("CAN transport should open"))
}

fn node(transports: Vec<Arc<dyn Transport>>) -> Node {
    Node::new(transports, NodeConfig::default()).expect("node should start")
}

fn never(_: &Frame) -> bool {
    false
}

/// Every payload is 20 bytes, so each transfer spans three CAN frames.
fn payload(i: u8) -> Vec<u8> {
    vec![i; 20]
}

fn drain(sub: &busprims::session::Subscriber, quiet: Duration) -> Vec<u64> {
    let mut ids = Vec::new();
    while let Some(transfer) = sub.receive(quiet).expect("receive should succeed") {
        ids.push(transfer.transfer_id);
    }
    ids
}

#[test]
fn delayed_copy_is_delivered_once() {
    let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
    let sender = node(vec![can(&bus_a, 1), can(&bus_b, 1)]);
    let slow: Arc<dyn Transport> = Arc::new(Impaired::new(
        can(&bus_b, 2),
        Duration::from_millis(20),
        never,
    ));
    let receiver = node(vec![can(&bus_a, 2), slow]);

    let publisher = sender.make_publisher(1000).expect("publisher");
    let subscriber = receiver.make_subscriber(1000).expect("subscriber");

    for i in 0..10 {
        publisher.publish(payload(i)).expect("publish should succeed");
    }
    let ids = drain(&subscriber, Duration::from_millis(500));
    assert_eq!(ids, (0..10).collect::<Vec<u64>>());

    let deadline = Instant::now() + WAIT;
    while receiver.duplicates_discarded() < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(receiver.duplicates_discarded(), 10);
    assert_eq!(subscriber.rejected(), 0);
}

#[test]
fn partially_dropped_streams_complement_each_other() {
    fn lose_even(frame: &Frame) -> bool {
        frame.transfer_id % 2 == 0 && frame.index == 1
    }
    fn lose_odd(frame: &Frame) -> bool {
        frame.transfer_id % 2 == 1 && frame.index == 2
    }

    let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
    let sender = node(vec![can(&bus_a, 1), can(&bus_b, 1)]);
    let receiver = node(vec![
        Arc::new(Impaired::new(can(&bus_a, 2), Duration::ZERO, lose_even)),
        Arc::new(Impaired::new(can(&bus_b, 2), Duration::ZERO, lose_odd)),
    ]);

    let publisher = sender.make_publisher(1001).expect("publisher");
    let subscriber = receiver.make_subscriber(1001).expect("subscriber");

    for i in 0..8 {
        publisher.publish(payload(i)).expect("publish should succeed");
    }
    let ids = drain(&subscriber, Duration::from_millis(500));
    assert_eq!(ids, (0..8).collect::<Vec<u64>>());
    assert_eq!(receiver.duplicates_discarded(), 0);

    let stats = receiver.statistics();
    // Interface 0 sees index 2 where index 1 was expected on every even transfer.
    assert_eq!(stats[0].reassembly.sequence_violations, 4);
    // Interface 1 is missing the tail of odd transfers; newer starts preempt them.
    assert_eq!(stats[1].reassembly.sequence_violations, 0);
    assert!(stats[1].reassembly.evictions >= 3);
}

#[test]
fn traffic_survives_interface_failure() {
    let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
    let primary = can(&bus_a, 1);
    let sender = node(vec![primary.clone(), can(&bus_b, 1)]);
    let receiver = node(vec![can(&bus_a, 2), can(&bus_b, 2)]);

    let publisher = sender.make_publisher(1002).expect("publisher");
    let subscriber = receiver.make_subscriber(1002).expect("subscriber");

    publisher.publish(payload(0)).expect("publish on both buses");
    primary.media().set_online(false);
    publisher.publish(payload(1)).expect("publish on the surviving bus");
    primary.media().set_online(true);
    publisher.publish(payload(2)).expect("publish on both buses again");

    assert_eq!(drain(&subscriber, Duration::from_millis(500)), vec![0, 1, 2]);
    let stats = sender.statistics();
    assert_eq!(stats[0].send_failures, 1);
    assert_eq!(stats[1].transfers_sent, 3);
}

#[test]
fn redundant_service_call_is_served_once() {
    let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
    let client_node = node(vec![can(&bus_a, 10), can(&bus_b, 10)]);
    let server_node = node(vec![can(&bus_a, 20), can(&bus_b, 20)]);

    let client = client_node.make_client(77).expect("client");
    let server = server_node.make_server(77).expect("server");

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..3 {
                server
                    .serve_once(WAIT, |request| Some(request.payload.clone()))
                    .expect("serve should succeed");
            }
        });
        for i in 0..3 {
            let response = client
                .call(20, payload(i), WAIT)
                .expect("call should succeed");
            assert_eq!(&response.payload[..], &payload(i)[..]);
        }
    });

    // Late copies of requests must not be served twice.
    assert!(server
        .receive_request(Duration::from_millis(300))
        .expect("receive should succeed")
        .is_none());
    assert_eq!(server.served(), 3);
}
