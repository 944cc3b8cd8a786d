//! Echo service over UDP loopback.
//!
//! A server node answers service 100 by returning the request payload; a
//! client node calls it a few times and then the server is shut down.
//!
//! Run with:
//!   cargo run --example udp-echo

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use busprims::session::{Node, NodeConfig};
use busprims::transport::udp::{UdpConfig, UdpTransport};

const ECHO_SERVICE: u16 = 100;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let loopback: SocketAddr = "127.0.0.1:0".parse()?;
    let server_link = Arc::new(UdpTransport::bind(loopback, Some(10), UdpConfig::default())?);
    let client_link = Arc::new(UdpTransport::bind(loopback, Some(11), UdpConfig::default())?);
    server_link.add_remote(client_link.local_addr()?);
    client_link.add_remote(server_link.local_addr()?);

    let server_node = Node::new(vec![server_link], NodeConfig::default())?;
    let client_node = Node::new(vec![client_link], NodeConfig::default())?;
    let server = server_node.make_server(ECHO_SERVICE)?;
    let client = client_node.make_client(ECHO_SERVICE)?;

    thread::scope(|scope| -> Result<(), Box<dyn std::error::Error>> {
        let serving = scope.spawn(|| server.serve(|request| Some(request.payload.clone())));

        for text in ["hello", "from", "busprims"] {
            let response = client.call(10, text.as_bytes().to_vec(), Duration::from_secs(1))?;
            eprintln!(
                "response {}: {}",
                response.transfer_id,
                String::from_utf8_lossy(&response.payload)
            );
        }

        server.close();
        match serving.join() {
            Ok(result) => result?,
            Err(_) => return Err("server thread panicked".into()),
        }
        Ok(())
    })?;

    eprintln!("served {} requests", server.served());
    Ok(())
}
