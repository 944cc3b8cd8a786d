//! Typed sessions.
//!
//! Each wrapper binds a session to a [`TypeDescriptor`] and converts between
//! [`Value`] trees and payload bytes. Received transfers that fail to decode
//! are logged and skipped, so a malformed peer cannot stall a reader loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use busprims_frame::Transfer;
use busprims_schema::{deserialize, serialize, SchemaRegistry, TypeDescriptor, Value};
use busprims_transport::NodeId;
use bytes::Bytes;
use tracing::warn;

use crate::client::ServiceClient;
use crate::error::{Result, SessionError};
use crate::publisher::Publisher;
use crate::server::ServiceServer;
use crate::subscriber::Subscriber;

#[derive(Debug)]
pub struct TypedPublisher {
    inner: Publisher,
    descriptor: Arc<TypeDescriptor>,
}

impl TypedPublisher {
    pub fn new(inner: Publisher, descriptor: Arc<TypeDescriptor>) -> Self {
        Self { inner, descriptor }
    }

    /// Bind using the descriptor registered for the publisher's subject.
    pub fn from_registry(inner: Publisher, registry: &SchemaRegistry) -> Result<Self> {
        let descriptor = registry.subject(inner.subject_id())?;
        Ok(Self::new(inner, descriptor))
    }

    pub fn publish(&self, value: &Value) -> Result<()> {
        let payload = serialize(value, &self.descriptor)?;
        self.inner.publish(payload)
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn session(&self) -> &Publisher {
        &self.inner
    }
}

#[derive(Debug)]
pub struct TypedSubscriber {
    inner: Subscriber,
    descriptor: Arc<TypeDescriptor>,
}

impl TypedSubscriber {
    pub fn new(inner: Subscriber, descriptor: Arc<TypeDescriptor>) -> Self {
        Self { inner, descriptor }
    }

    pub fn from_registry(inner: Subscriber, registry: &SchemaRegistry) -> Result<Self> {
        let descriptor = registry.subject(inner.subject_id())?;
        Ok(Self::new(inner, descriptor))
    }

    /// Next decodable message within `timeout`, with its transfer metadata.
    pub fn receive(&self, timeout: Duration) -> Result<Option<(Value, Transfer)>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(transfer) = self.inner.receive(remaining)? else {
                return Ok(None);
            };
            match deserialize(&transfer.payload, &self.descriptor) {
                Ok(value) => return Ok(Some((value, transfer))),
                Err(err) => warn!(
                    subject_id = self.inner.subject_id(),
                    type_name = self.descriptor.name(),
                    source = ?transfer.source_node_id,
                    error = %err,
                    "undecodable message dropped"
                ),
            }
        }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn session(&self) -> &Subscriber {
        &self.inner
    }
}

#[derive(Debug)]
pub struct TypedClient {
    inner: ServiceClient,
    request: Arc<TypeDescriptor>,
    response: Arc<TypeDescriptor>,
}

impl TypedClient {
    pub fn new(
        inner: ServiceClient,
        request: Arc<TypeDescriptor>,
        response: Arc<TypeDescriptor>,
    ) -> Self {
        Self {
            inner,
            request,
            response,
        }
    }

    pub fn from_registry(inner: ServiceClient, registry: &SchemaRegistry) -> Result<Self> {
        let service = registry.service(inner.service_id())?;
        Ok(Self::new(inner, service.request, service.response))
    }

    /// Call `server`; an undecodable response is returned as an error.
    pub fn call(&self, server: NodeId, request: &Value, timeout: Duration) -> Result<Value> {
        let payload = serialize(request, &self.request)?;
        let response = self.inner.call(server, payload, timeout)?;
        Ok(deserialize(&response.payload, &self.response)?)
    }

    pub fn session(&self) -> &ServiceClient {
        &self.inner
    }
}

#[derive(Debug)]
pub struct TypedServer {
    inner: ServiceServer,
    request: Arc<TypeDescriptor>,
    response: Arc<TypeDescriptor>,
}

impl TypedServer {
    pub fn new(
        inner: ServiceServer,
        request: Arc<TypeDescriptor>,
        response: Arc<TypeDescriptor>,
    ) -> Self {
        Self {
            inner,
            request,
            response,
        }
    }

    pub fn from_registry(inner: ServiceServer, registry: &SchemaRegistry) -> Result<Self> {
        let service = registry.service(inner.service_id())?;
        Ok(Self::new(inner, service.request, service.response))
    }

    /// Receive one request and answer it with `handler`.
    ///
    /// Requests that fail to decode, and responses that fail to encode, are
    /// logged and left unanswered.
    pub fn serve_once<F>(&self, timeout: Duration, handler: F) -> Result<bool>
    where
        F: FnOnce(Value, &Transfer) -> Option<Value>,
    {
        self.inner.serve_once(timeout, |transfer| {
            let request = match deserialize(&transfer.payload, &self.request) {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        service_id = self.inner.service_id(),
                        client = ?transfer.source_node_id,
                        error = %err,
                        "undecodable request dropped"
                    );
                    return None;
                }
            };
            let response = handler(request, transfer)?;
            match serialize(&response, &self.response) {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(err) => {
                    warn!(
                        service_id = self.inner.service_id(),
                        error = %err,
                        "response does not match its type"
                    );
                    None
                }
            }
        })
    }

    /// Serve until the server or its node is closed.
    pub fn serve<F>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(Value, &Transfer) -> Option<Value>,
    {
        let poll = self.inner.poll_interval();
        loop {
            match self.serve_once(poll, &mut handler) {
                Ok(_) => {}
                Err(SessionError::Cancelled | SessionError::Closed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    pub fn session(&self) -> &ServiceServer {
        &self.inner
    }
}
