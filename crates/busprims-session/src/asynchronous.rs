//! Async adapters over the blocking sessions.
//!
//! Sessions block on crossbeam channels, so each call runs on tokio's
//! blocking pool. The session handle must be shared through an [`Arc`] to
//! outlive the spawned task.

use std::sync::Arc;
use std::time::Duration;

use busprims_frame::Transfer;
use busprims_transport::NodeId;
use bytes::Bytes;
use tokio::task;

use crate::client::ServiceClient;
use crate::error::{Result, SessionError};
use crate::server::ServiceServer;
use crate::subscriber::Subscriber;

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::TaskFailed(e.to_string()))?
}

impl Subscriber {
    /// Async form of [`Subscriber::receive`].
    pub async fn receive_async(self: &Arc<Self>, timeout: Duration) -> Result<Option<Transfer>> {
        let this = Arc::clone(self);
        blocking(move || this.receive(timeout)).await
    }
}

impl ServiceClient {
    /// Async form of [`ServiceClient::call`].
    pub async fn call_async(
        self: &Arc<Self>,
        server: NodeId,
        request: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Transfer> {
        let this = Arc::clone(self);
        let request = request.into();
        blocking(move || this.call(server, request, timeout)).await
    }
}

impl ServiceServer {
    /// Async form of [`ServiceServer::receive_request`].
    pub async fn receive_request_async(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<Option<Transfer>> {
        let this = Arc::clone(self);
        blocking(move || this.receive_request(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use busprims_transport::can::{CanTransport, VirtualCanBus};
    use busprims_transport::Transport;

    use super::*;
    use crate::{Node, NodeConfig};

    fn node(bus: &VirtualCanBus, id: u16) -> Node {
        let t: Arc<dyn Transport> = Arc::new(CanTransport::new(bus.attach(), Some(id)).unwrap());
        Node::new(vec![t], NodeConfig::default()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_receive_async() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let publisher = a.make_publisher(7).unwrap();
        let subscriber = Arc::new(b.make_subscriber(7).unwrap());

        publisher.publish(&b"hello"[..]).unwrap();
        let transfer = subscriber
            .receive_async(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&transfer.payload[..], b"hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_call_async() {
        let bus = VirtualCanBus::new();
        let (a, b) = (node(&bus, 1), node(&bus, 2));
        let client = Arc::new(a.make_client(40).unwrap());
        let server = Arc::new(b.make_server(40).unwrap());

        let responder = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let request = server
                    .receive_request_async(Duration::from_secs(2))
                    .await
                    .unwrap()
                    .unwrap();
                server.respond(&request, request.payload.clone()).unwrap();
            })
        };

        let response = client
            .call_async(2, &b"echo"[..], Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&response.payload[..], b"echo");
        responder.await.unwrap();
    }
}
