use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use busprims::schema::{FieldKind, TypeDescriptor, Value};
use busprims::session::{Node, NodeConfig, TypedClient, TypedServer};
use busprims::transport::udp::{UdpConfig, UdpTransport};
use busprims::transport::{NodeId, Transport};

const WAIT: Duration = Duration::from_secs(2);

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn udp(id: NodeId) -> Arc<UdpTransport> {
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("loopback address");
    Arc::new(UdpTransport::bind(addr, Some(id), UdpConfig::default()).expect("UDP bind"))
}

fn udp_pair(a: NodeId, b: NodeId) -> (Node, Node) {
    let (ta, tb) = (udp(a), udp(b));
    ta.add_remote(tb.local_addr().expect("local address"));
    tb.add_remote(ta.local_addr().expect("local address"));
    let na = Node::new(vec![ta], NodeConfig::default()).expect("node should start");
    let nb = Node::new(vec![tb], NodeConfig::default()).expect("node should start");
    (na, nb)
}

fn add_service() -> (Arc<TypeDescriptor>, Arc<TypeDescriptor>) {
    let request = TypeDescriptor::structure("demo.Add.Request")
        .field("a", FieldKind::int(32))
        .field("b", FieldKind::int(32))
        .build()
        .expect("request descriptor");
    let response = TypeDescriptor::structure("demo.Add.Response")
        .field("sum", FieldKind::int(33))
        .build()
        .expect("response descriptor");
    (Arc::new(request), Arc::new(response))
}

#[test]
fn udp_multi_frame_message() {
    let (a, b) = udp_pair(1, 2);
    let publisher = a.make_publisher(2000).expect("publisher");
    let subscriber = b.make_subscriber(2000).expect("subscriber");

    // 5000 bytes plus the transfer CRC need five 1200-byte datagrams.
    let data = pattern(5000);
    publisher.publish(data.clone()).expect("publish should succeed");
    let transfer = subscriber
        .receive(WAIT)
        .expect("receive should succeed")
        .expect("message should arrive");
    assert_eq!(&transfer.payload[..], &data[..]);
    assert_eq!(transfer.source_node_id, Some(1));
    assert_eq!(a.statistics()[0].transport.out_frames, 5);
    assert_eq!(b.statistics()[0].reassembly.transfers, 1);
}

#[test]
fn udp_typed_service_call() {
    let (client_node, server_node) = udp_pair(100, 200);
    let (request, response) = add_service();
    let client = TypedClient::new(
        client_node.make_client(30).expect("client"),
        request.clone(),
        response.clone(),
    );
    let server = TypedServer::new(server_node.make_server(30).expect("server"), request, response);

    thread::scope(|scope| {
        scope.spawn(|| {
            server
                .serve_once(WAIT, |req, _| {
                    let a = req.get("a")?.as_i64()?;
                    let b = req.get("b")?.as_i64()?;
                    Some(Value::structure([("sum", Value::Signed(a + b))]))
                })
                .expect("serve should succeed")
        });
        let sum = client
            .call(
                200,
                &Value::structure([
                    ("a", Value::Signed(i32::MAX as i64)),
                    ("b", Value::Signed(i32::MAX as i64)),
                ]),
                WAIT,
            )
            .expect("call should succeed");
        assert_eq!(sum.get("sum"), Some(&Value::Signed(2 * i32::MAX as i64)));
    });
}

#[test]
fn udp_call_to_silent_server_times_out() {
    let (client_node, server_node) = udp_pair(1, 2);
    let client = client_node.make_client(31).expect("client");
    let _server = server_node.make_server(31).expect("server");

    let started = std::time::Instant::now();
    let err = client
        .call(2, &b"anyone?"[..], WAIT)
        .expect_err("nobody answers");
    let elapsed = started.elapsed();
    assert!(matches!(err, busprims::session::SessionError::RequestTimedOut(_)));
    assert!(elapsed >= WAIT, "returned after {elapsed:?}");
    assert!(elapsed < WAIT + Duration::from_secs(1), "returned after {elapsed:?}");
}

#[cfg(unix)]
mod serial {
    use std::os::unix::net::UnixStream;

    use busprims::transport::serial::{SerialConfig, SerialTransport};

    use super::*;

    fn serial_pair(a: NodeId, b: NodeId) -> (Node, Node, Arc<SerialTransport<UnixStream>>) {
        let (ea, eb) = UnixStream::pair().expect("socket pair");
        let ta = Arc::new(SerialTransport::new(ea, Some(a), SerialConfig::default()).expect("serial"));
        let tb: Arc<dyn Transport> =
            Arc::new(SerialTransport::new(eb, Some(b), SerialConfig::default()).expect("serial"));
        let na = Node::new(vec![ta.clone()], NodeConfig::default()).expect("node should start");
        let nb = Node::new(vec![tb], NodeConfig::default()).expect("node should start");
        (na, nb, ta)
    }

    #[test]
    fn serial_large_message_is_one_frame() {
        let (a, b, ta) = serial_pair(1, 2);
        let publisher = a.make_publisher(10).expect("publisher");
        let subscriber = b.make_subscriber(10).expect("subscriber");

        let data = pattern(64 * 1024);
        publisher.publish(data.clone()).expect("publish should succeed");
        let transfer = subscriber
            .receive(WAIT)
            .expect("receive should succeed")
            .expect("message should arrive");
        assert_eq!(transfer.payload.len(), data.len());
        assert_eq!(&transfer.payload[..], &data[..]);
        assert_eq!(ta.statistics().out_frames, 1);
    }

    #[test]
    fn serial_service_copies_are_suppressed() {
        let (client_node, server_node, client_link) = serial_pair(3, 4);
        let client = client_node.make_client(5).expect("client");
        let server = server_node.make_server(5).expect("server");

        thread::scope(|scope| {
            scope.spawn(|| {
                server
                    .serve_once(WAIT, |req| Some(req.payload.clone()))
                    .expect("serve should succeed")
            });
            let response = client
                .call(4, &b"twice on the wire"[..], WAIT)
                .expect("call should succeed");
            assert_eq!(&response.payload[..], b"twice on the wire");
        });

        // Requests and responses are each written twice.
        assert_eq!(client_link.statistics().out_frames, 2);
        assert!(server
            .receive_request(Duration::from_millis(300))
            .expect("receive should succeed")
            .is_none());
        assert_eq!(server.served(), 1);
    }
}
