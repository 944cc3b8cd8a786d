use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::header::{DatagramHeader, HEADER_SIZE};
use super::{DEFAULT_MTU, MAX_MTU, MAX_NODE_ID};
use crate::error::{Result, TransportError};
use crate::frame::Frame;
use crate::stats::{StatisticsSnapshot, TransportStatistics};
use crate::traits::{ProtocolParameters, Transport};
use crate::types::{NodeId, TransferIdModulo};

/// Smallest poll timeout handed to the socket; zero means "block forever".
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// UDP transport configuration.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Frame payload bytes per datagram.
    pub mtu: usize,
    /// Every frame is sent to each of these endpoints. More can be added
    /// after binding with [`UdpTransport::add_remote`].
    pub remotes: Vec<SocketAddr>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            remotes: Vec::new(),
        }
    }
}

/// Transport carrying one frame per datagram over a bound [`UdpSocket`].
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_node_id: Option<NodeId>,
    config: UdpConfig,
    remotes: RwLock<Vec<SocketAddr>>,
    recv_buf: Mutex<Vec<u8>>,
    stats: TransportStatistics,
    closed: AtomicBool,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr, local_node_id: Option<NodeId>, config: UdpConfig) -> Result<Self> {
        if config.mtu == 0 || config.mtu > MAX_MTU {
            return Err(TransportError::InvalidConfiguration(format!(
                "UDP MTU {} outside 1..={MAX_MTU}",
                config.mtu
            )));
        }
        if let Some(id) = local_node_id {
            if id > MAX_NODE_ID {
                return Err(TransportError::InvalidConfiguration(format!(
                    "UDP node-ID {id} exceeds {MAX_NODE_ID}"
                )));
            }
        }
        let socket = UdpSocket::bind(addr)?;
        debug!(
            local = ?socket.local_addr().ok(),
            remotes = ?config.remotes,
            ?local_node_id,
            "UDP transport bound"
        );
        Ok(Self {
            socket,
            local_node_id,
            recv_buf: Mutex::new(vec![0u8; HEADER_SIZE + MAX_MTU]),
            remotes: RwLock::new(config.remotes.clone()),
            config,
            stats: TransportStatistics::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start sending to `remote` as well. Adding a known endpoint is a no-op.
    pub fn add_remote(&self, remote: SocketAddr) {
        let mut remotes = self.remotes.write();
        if !remotes.contains(&remote) {
            debug!(%remote, "UDP remote added");
            remotes.push(remote);
        }
    }

    pub fn remotes(&self) -> Vec<SocketAddr> {
        self.remotes.read().clone()
    }

    fn decode(&self, datagram: &[u8], timestamp: Instant) -> Option<Frame> {
        let header = DatagramHeader::decode(datagram)?;
        let frame = Frame {
            timestamp,
            priority: header.priority,
            data_specifier: header.data_specifier,
            source_node_id: header.source_node_id,
            destination_node_id: header.destination_node_id,
            transfer_id: header.transfer_id,
            index: header.index,
            end_of_transfer: header.end_of_transfer,
            toggle: header.index % 2 == 0,
            payload: Bytes::copy_from_slice(&datagram[HEADER_SIZE..]),
        };
        frame.validate().ok()?;
        frame.validate_node_ids(MAX_NODE_ID).ok()?;
        Some(frame)
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &Frame, deadline: Instant) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        frame.validate()?;
        frame.validate_node_ids(MAX_NODE_ID)?;
        if frame.payload.len() > self.config.mtu {
            return Err(TransportError::CapacityExceeded {
                size: frame.payload.len(),
                max: self.config.mtu,
            });
        }
        if Instant::now() >= deadline {
            self.stats.record_out_error();
            return Err(TransportError::MediaUnavailable(
                "send deadline expired".into(),
            ));
        }

        let mut datagram = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
        DatagramHeader {
            priority: frame.priority,
            source_node_id: frame.source_node_id,
            destination_node_id: frame.destination_node_id,
            data_specifier: frame.data_specifier,
            transfer_id: frame.transfer_id,
            index: frame.index,
            end_of_transfer: frame.end_of_transfer,
        }
        .encode(&mut datagram)?;
        datagram.extend_from_slice(&frame.payload);

        let mut last_error = None;
        let mut delivered = 0usize;
        for remote in self.remotes.read().iter() {
            match self.socket.send_to(&datagram, remote) {
                Ok(_) => delivered += 1,
                Err(err) => {
                    debug!(%remote, error = %err, "UDP send failed");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if delivered == 0 => {
                self.stats.record_out_error();
                Err(TransportError::MediaUnavailable(err.to_string()))
            }
            _ => {
                self.stats.record_out(datagram.len());
                Ok(())
            }
        }
    }

    fn poll(&self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut buf = self.recv_buf.lock();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.socket
                .set_read_timeout(Some(remaining.max(MIN_SOCKET_TIMEOUT)))?;
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            match self.decode(&buf[..len], Instant::now()) {
                Some(frame)
                    if frame.source_node_id.is_some()
                        && frame.source_node_id == self.local_node_id =>
                {
                    trace!(%from, "dropping own datagram");
                }
                Some(frame) => {
                    self.stats.record_in(len);
                    return Ok(Some(frame));
                }
                None => {
                    trace!(%from, len, "invalid datagram");
                    self.stats.record_rejected();
                }
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    fn max_frame_payload_size(&self) -> usize {
        self.config.mtu
    }

    fn protocol_parameters(&self) -> ProtocolParameters {
        ProtocolParameters {
            transfer_id_modulo: TransferIdModulo::WIDE,
            max_nodes: MAX_NODE_ID as u32 + 1,
            mtu: self.config.mtu,
        }
    }

    fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(local = ?self.socket.local_addr().ok(), "UDP transport closed");
        }
    }

    fn descriptor(&self) -> String {
        match self.socket.local_addr() {
            Ok(addr) => format!("udp:{addr}"),
            Err(_) => "udp".into(),
        }
    }
}
