use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::frame::{encode_frame, MAX_NODE_ID};
use super::parser::{ParsedItem, StreamParser};
use super::port::SerialPort;
use super::{MTU_RANGE, SERVICE_TRANSFER_MULTIPLIER_RANGE};
use crate::error::{Result, TransportError};
use crate::frame::Frame;
use crate::stats::{StatisticsSnapshot, TransportStatistics};
use crate::traits::{ProtocolParameters, Transport};
use crate::types::{NodeId, TransferIdModulo};

const READ_CHUNK_SIZE: usize = 4096;

/// Serial transport configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Largest outgoing frame payload. Reception always accepts the maximum.
    pub mtu: usize,
    /// Every service transfer is emitted this many times to mask
    /// occasional byte loss; receivers drop the copies.
    pub service_transfer_multiplier: usize,
    /// How often the reader thread wakes up to notice `close()`.
    pub read_timeout: Duration,
    /// Frames buffered between the reader thread and `poll`.
    pub queue_capacity: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            mtu: *MTU_RANGE.end(),
            service_transfer_multiplier: 2,
            read_timeout: Duration::from_millis(100),
            queue_capacity: 1024,
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<()> {
        if !MTU_RANGE.contains(&self.mtu) {
            return Err(TransportError::InvalidConfiguration(format!(
                "serial MTU {} outside {MTU_RANGE:?}",
                self.mtu
            )));
        }
        if !SERVICE_TRANSFER_MULTIPLIER_RANGE.contains(&self.service_transfer_multiplier) {
            return Err(TransportError::InvalidConfiguration(format!(
                "service transfer multiplier {} outside {SERVICE_TRANSFER_MULTIPLIER_RANGE:?}",
                self.service_transfer_multiplier
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(TransportError::InvalidConfiguration(
                "read timeout must be non-zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(TransportError::InvalidConfiguration(
                "queue capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    stats: TransportStatistics,
}

/// Serial transport over any [`SerialPort`].
///
/// A background thread reads the stream, parses frames and queues them for
/// [`Transport::poll`]. Writes happen on the caller's thread under a lock.
#[derive(Debug)]
pub struct SerialTransport<P: SerialPort> {
    writer: Mutex<P>,
    port_name: String,
    local_node_id: Option<NodeId>,
    config: SerialConfig,
    rx: Receiver<Frame>,
    reader: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl<P: SerialPort> SerialTransport<P> {
    pub fn new(port: P, local_node_id: Option<NodeId>, config: SerialConfig) -> Result<Self> {
        config.validate()?;
        if let Some(id) = local_node_id {
            if id > MAX_NODE_ID {
                return Err(TransportError::InvalidConfiguration(format!(
                    "serial node-ID {id} exceeds {MAX_NODE_ID}"
                )));
            }
        }

        let port_name = port.port_name();
        let reader_port = port.try_clone_port()?;
        reader_port.set_read_timeout(Some(config.read_timeout))?;

        let shared = Arc::new(Shared::default());
        let (tx, rx) = channel::bounded(config.queue_capacity);
        let reader = thread::Builder::new()
            .name(format!("busprims-serial-rx:{port_name}"))
            .spawn({
                let shared = Arc::clone(&shared);
                let name = port_name.clone();
                move || reader_loop(reader_port, tx, shared, name)
            })?;

        debug!(port = %port_name, ?local_node_id, mtu = config.mtu, "serial transport created");
        Ok(Self {
            writer: Mutex::new(port),
            port_name,
            local_node_id,
            config,
            rx,
            reader: Mutex::new(Some(reader)),
            shared,
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

fn reader_loop<P: SerialPort>(mut port: P, tx: Sender<Frame>, shared: Arc<Shared>, name: String) {
    let mut parser = StreamParser::new(*MTU_RANGE.end());
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    while !shared.closed.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {
                debug!(port = %name, "serial stream reached EOF");
                break;
            }
            Ok(n) => {
                let timestamp = Instant::now();
                parser.process_chunk(&buf[..n], timestamp, &mut |item| match item {
                    ParsedItem::Frame(frame) => {
                        shared.stats.record_in(frame.payload.len());
                        match tx.try_send(frame) {
                            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                            Err(TrySendError::Full(_)) => {
                                shared.stats.record_rejected();
                                warn!(port = %name, "serial receive queue full, frame dropped");
                            }
                        }
                    }
                    ParsedItem::OutOfBand(data) => {
                        shared.stats.record_out_of_band(data.len());
                        warn!(
                            port = %name,
                            data = %String::from_utf8_lossy(&data),
                            "out-of-band data"
                        );
                    }
                });
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                if !shared.closed.load(Ordering::SeqCst) {
                    warn!(port = %name, error = %err, "serial reader failed, closing transport");
                }
                break;
            }
        }
    }
    shared.closed.store(true, Ordering::SeqCst);
    debug!(port = %name, "serial reader exiting");
}

impl<P: SerialPort> Transport for SerialTransport<P> {
    fn send(&self, frame: &Frame, deadline: Instant) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if frame.payload.len() > self.config.mtu {
            return Err(TransportError::CapacityExceeded {
                size: frame.payload.len(),
                max: self.config.mtu,
            });
        }
        let mut wire = BytesMut::new();
        encode_frame(frame, &mut wire)?;

        let mut port = self.writer.lock();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.shared.stats.record_out_error();
            return Err(TransportError::MediaUnavailable(
                "send deadline expired".into(),
            ));
        }
        let written = port
            .set_write_timeout(Some(remaining))
            .and_then(|()| port.write_all(&wire))
            .and_then(|()| port.flush());
        match written {
            Ok(()) => {
                self.shared.stats.record_out(wire.len());
                Ok(())
            }
            Err(err) => {
                self.shared.stats.record_out_error();
                info!(port = %self.port_name, error = %err, "serial write failed");
                Err(TransportError::MediaUnavailable(err.to_string()))
            }
        }
    }

    fn send_transfer(&self, frames: &[Frame], deadline: Instant) -> Result<()> {
        let copies = match frames.first() {
            Some(f) if f.data_specifier.is_service() => self.config.service_transfer_multiplier,
            _ => 1,
        };
        let sent = (0..copies).try_for_each(|_| {
            frames
                .iter()
                .try_for_each(|frame| self.send(frame, deadline))
        });
        match sent {
            Ok(()) => self.shared.stats.record_out_transfer(),
            Err(_) => self.shared.stats.record_out_incomplete(),
        }
        sent
    }

    fn poll(&self, timeout: Duration) -> Result<Option<Frame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) if self.is_closed() => Err(TransportError::Closed),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
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
        self.shared.stats.snapshot()
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.writer.lock().shutdown() {
            debug!(port = %self.port_name, error = %err, "shutdown on close failed");
        }
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        debug!(port = %self.port_name, "serial transport closed");
    }

    fn descriptor(&self) -> String {
        format!(
            "serial:{} srv_mult={}",
            self.port_name, self.config.service_transfer_multiplier
        )
    }
}

impl<P: SerialPort> Drop for SerialTransport<P> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::{DataSpecifier, Priority};
    use bytes::Bytes;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    const WAIT: Duration = Duration::from_secs(1);

    fn deadline() -> Instant {
        Instant::now() + WAIT
    }

    fn pair(config: SerialConfig) -> (SerialTransport<UnixStream>, SerialTransport<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            SerialTransport::new(a, Some(1), config.clone()).unwrap(),
            SerialTransport::new(b, Some(2), config).unwrap(),
        )
    }

    fn message(tid: u64, payload: &'static [u8]) -> Frame {
        Frame::single(
            Priority::Nominal,
            DataSpecifier::message(100).unwrap(),
            Some(1),
            None,
            tid,
            payload,
        )
    }

    #[test]
    fn test_send_and_poll() {
        let (a, b) = pair(SerialConfig::default());
        a.send(&message(11, b"\x9e hello \x8e"), deadline()).unwrap();
        let got = b.poll(WAIT).unwrap().unwrap();
        assert_eq!(got.transfer_id, 11);
        assert_eq!(got.payload, Bytes::from_static(b"\x9e hello \x8e"));
        assert!(b.poll(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn test_service_transfers_are_multiplied() {
        let config = SerialConfig {
            service_transfer_multiplier: 3,
            ..SerialConfig::default()
        };
        let (a, b) = pair(config);
        let request = Frame::single(
            Priority::Nominal,
            DataSpecifier::request(7).unwrap(),
            Some(1),
            Some(2),
            5,
            &b"req"[..],
        );
        a.send_transfer(&[request], deadline()).unwrap();
        for _ in 0..3 {
            assert_eq!(b.poll(WAIT).unwrap().unwrap().transfer_id, 5);
        }
        assert!(b.poll(Duration::from_millis(50)).unwrap().is_none());

        a.send_transfer(&[message(6, b"msg")], deadline()).unwrap();
        assert_eq!(b.poll(WAIT).unwrap().unwrap().transfer_id, 6);
        assert!(b.poll(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn test_transfer_counters() {
        let config = SerialConfig {
            mtu: 1024,
            ..SerialConfig::default()
        };
        let (a, b) = pair(config);
        let request = Frame::single(
            Priority::Nominal,
            DataSpecifier::request(7).unwrap(),
            Some(1),
            Some(2),
            5,
            &b"req"[..],
        );
        a.send_transfer(&[request], deadline()).unwrap();
        a.send_transfer(&[message(6, b"msg")], deadline()).unwrap();
        let too_big = Frame::single(
            Priority::Nominal,
            DataSpecifier::message(100).unwrap(),
            Some(1),
            None,
            7,
            vec![0u8; 1025],
        );
        assert!(a.send_transfer(&[too_big], deadline()).is_err());

        let stats = a.statistics();
        // The request went out twice but counts as one transfer.
        assert_eq!(stats.out_frames, 3);
        assert_eq!(stats.out_transfers, 2);
        assert_eq!(stats.out_incomplete, 1);
        for _ in 0..3 {
            b.poll(WAIT).unwrap().unwrap();
        }
    }

    #[test]
    fn test_out_of_band_counted() {
        let (a, b) = UnixStream::pair().unwrap();
        let rx = SerialTransport::new(b, None, SerialConfig::default()).unwrap();
        let mut raw = a;
        raw.write_all(b"garbage before frame").unwrap();
        let mut wire = BytesMut::new();
        encode_frame(&message(1, b"ok"), &mut wire).unwrap();
        raw.write_all(&wire).unwrap();

        assert_eq!(rx.poll(WAIT).unwrap().unwrap().payload, Bytes::from_static(b"ok"));
        assert_eq!(rx.statistics().out_of_band_bytes, 20);
    }

    #[test]
    fn test_config_validation() {
        let (a, _b) = UnixStream::pair().unwrap();
        for config in [
            SerialConfig {
                mtu: 1023,
                ..SerialConfig::default()
            },
            SerialConfig {
                service_transfer_multiplier: 6,
                ..SerialConfig::default()
            },
            SerialConfig {
                service_transfer_multiplier: 0,
                ..SerialConfig::default()
            },
        ] {
            assert!(matches!(
                SerialTransport::new(a.try_clone().unwrap(), Some(1), config),
                Err(TransportError::InvalidConfiguration(_))
            ));
        }
        assert!(SerialTransport::new(a, Some(4096), SerialConfig::default()).is_err());
    }

    #[test]
    fn test_capacity_and_close() {
        let config = SerialConfig {
            mtu: 1024,
            ..SerialConfig::default()
        };
        let (a, b) = pair(config);
        let big = Frame::single(
            Priority::Nominal,
            DataSpecifier::message(1).unwrap(),
            Some(1),
            None,
            0,
            vec![0u8; 1025],
        );
        assert!(matches!(
            a.send(&big, deadline()),
            Err(TransportError::CapacityExceeded { max: 1024, .. })
        ));

        a.close();
        assert!(matches!(a.send(&message(0, b""), deadline()), Err(TransportError::Closed)));
        // Peer sees EOF and closes too.
        assert!(matches!(b.poll(WAIT), Err(TransportError::Closed) | Ok(None)));
    }
}
