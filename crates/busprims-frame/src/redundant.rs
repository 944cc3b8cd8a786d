use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use busprims_transport::{
    Frame, NodeId, StatisticsSnapshot, TransferIdModulo, Transport, TransportError,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::RedundancyConfig;
use crate::dedup::Deduplicator;
use crate::error::{FrameError, Result};
use crate::reassembler::{ReassemblyStatistics, Reassembler};
use crate::splitter::split_transfer;
use crate::transfer::Transfer;

#[derive(Debug, Default)]
struct InterfaceCounters {
    transfers_sent: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug)]
struct Interface {
    transport: Arc<dyn Transport>,
    counters: InterfaceCounters,
}

/// Per-interface view returned by [`RedundantTransport::statistics`].
#[derive(Debug, Clone)]
pub struct InterfaceStatistics {
    pub descriptor: String,
    pub transport: StatisticsSnapshot,
    pub reassembly: ReassemblyStatistics,
    pub transfers_sent: u64,
    pub send_failures: u64,
}

#[derive(Debug)]
struct Inbound {
    interface: usize,
    frame: Frame,
}

#[derive(Debug)]
struct RxState {
    reassemblers: Vec<Reassembler>,
    dedup: Deduplicator,
    duplicates: u64,
}

impl RxState {
    fn process(&mut self, inbound: Inbound) -> Option<Transfer> {
        let interface = inbound.interface;
        match self.reassemblers[interface].accept(inbound.frame) {
            Ok(Some(transfer)) => {
                if self.dedup.admit(&transfer, Instant::now()) {
                    Some(transfer)
                } else {
                    self.duplicates += 1;
                    trace!(
                        interface,
                        key = ?transfer.session_key(),
                        transfer_id = transfer.transfer_id,
                        "duplicate transfer discarded"
                    );
                    None
                }
            }
            Ok(None) => None,
            Err(err) => {
                debug!(interface, error = %err, "frame dropped");
                None
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        for r in &mut self.reassemblers {
            r.sweep(now);
        }
        self.dedup.expire(now);
    }
}

/// Several transports driven as one transfer-level link.
///
/// Outgoing transfers are split and emitted on every interface. Each
/// interface is polled by its own worker thread; frames funnel through one
/// bounded channel into per-interface reassemblers, and completed transfers
/// pass a deduplicator so that each one is delivered once.
#[derive(Debug)]
pub struct RedundantTransport {
    interfaces: Vec<Interface>,
    inbound: Receiver<Inbound>,
    /// Serializes receivers so frames reach the reassemblers in arrival order.
    receiving: Mutex<()>,
    rx: Mutex<RxState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    modulo: TransferIdModulo,
    local_node_id: Option<NodeId>,
    config: RedundancyConfig,
}

impl RedundantTransport {
    /// Start receive workers over `transports`.
    ///
    /// All transports must agree on the local node-ID. The transfer-ID
    /// modulus of the link is the smallest among them.
    pub fn new(transports: Vec<Arc<dyn Transport>>, config: RedundancyConfig) -> Result<Self> {
        let Some(first) = transports.first() else {
            return Err(TransportError::InvalidConfiguration(
                "at least one transport is required".into(),
            )
            .into());
        };
        let local_node_id = first.local_node_id();
        if let Some(other) = transports
            .iter()
            .find(|t| t.local_node_id() != local_node_id)
        {
            return Err(TransportError::InvalidConfiguration(format!(
                "node-ID mismatch: {} has {:?}, {} has {:?}",
                first.descriptor(),
                local_node_id,
                other.descriptor(),
                other.local_node_id()
            ))
            .into());
        }

        let modulo = transports
            .iter()
            .map(|t| t.protocol_parameters().transfer_id_modulo)
            .fold(TransferIdModulo::WIDE, TransferIdModulo::min);
        let reassemblers = transports
            .iter()
            .map(|t| {
                Reassembler::new(
                    config.reassembly.clone(),
                    t.protocol_parameters().transfer_id_modulo,
                )
            })
            .collect();

        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel::bounded(config.channel_capacity.max(1));
        let mut workers = Vec::with_capacity(transports.len());
        for (index, transport) in transports.iter().enumerate() {
            let transport = Arc::clone(transport);
            let tx = tx.clone();
            let running = Arc::clone(&running);
            let poll_interval = config.poll_interval;
            let handle = thread::Builder::new()
                .name(format!("busprims-rx-{index}"))
                .spawn(move || receive_worker(index, transport, tx, running, poll_interval))
                .map_err(TransportError::Io)?;
            workers.push(handle);
        }

        info!(
            interfaces = transports.len(),
            transfer_id_bits = modulo.bits(),
            ?local_node_id,
            "redundant transport started"
        );
        Ok(Self {
            interfaces: transports
                .into_iter()
                .map(|transport| Interface {
                    transport,
                    counters: InterfaceCounters::default(),
                })
                .collect(),
            inbound: rx,
            receiving: Mutex::new(()),
            rx: Mutex::new(RxState {
                reassemblers,
                dedup: Deduplicator::new(config.dedup_window, config.max_dedup_entries, modulo),
                duplicates: 0,
            }),
            workers: Mutex::new(workers),
            running,
            modulo,
            local_node_id,
            config,
        })
    }

    /// Emit `transfer` on every interface.
    ///
    /// Succeeds if at least one interface accepted it; otherwise returns the
    /// last interface's error.
    pub fn send(&self, transfer: &Transfer, deadline: Instant) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }
        transfer.validate()?;

        let mut last_error = None;
        let mut delivered = 0usize;
        for (index, iface) in self.interfaces.iter().enumerate() {
            let sent = split_transfer(transfer, iface.transport.transfer_payload_capacity())
                .and_then(|frames| {
                    iface
                        .transport
                        .send_transfer(&frames, deadline)
                        .map_err(FrameError::from)
                });
            match sent {
                Ok(()) => {
                    delivered += 1;
                    iface.counters.transfers_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    iface.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        interface = index,
                        transport = %iface.transport.descriptor(),
                        error = %err,
                        "send failed on interface"
                    );
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if delivered == 0 => Err(err),
            _ => Ok(()),
        }
    }

    /// Wait up to `timeout` for the next deduplicated transfer.
    ///
    /// Expired partial transfers and dedup entries are swept on every wakeup.
    /// The receive state is locked only while a frame is processed, so
    /// statistics stay readable while a receiver waits.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Transfer>> {
        let deadline = Instant::now() + timeout;
        let _receiving = self.receiving.lock();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Err(TransportError::Closed.into());
            }
            let now = Instant::now();
            self.rx.lock().sweep(now);
            let remaining = deadline.saturating_duration_since(now);
            match self.inbound.recv_timeout(remaining) {
                Ok(inbound) => {
                    if let Some(transfer) = self.rx.lock().process(inbound) {
                        return Ok(Some(transfer));
                    }
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Closed.into());
                }
            }
        }
    }

    pub fn transfer_id_modulo(&self) -> TransferIdModulo {
        self.modulo
    }

    pub fn local_node_id(&self) -> Option<NodeId> {
        self.local_node_id
    }

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn config(&self) -> &RedundancyConfig {
        &self.config
    }

    /// Completed transfers discarded as copies.
    pub fn duplicates_discarded(&self) -> u64 {
        self.rx.lock().duplicates
    }

    pub fn statistics(&self) -> Vec<InterfaceStatistics> {
        let rx = self.rx.lock();
        self.interfaces
            .iter()
            .zip(rx.reassemblers.iter())
            .map(|(iface, r)| InterfaceStatistics {
                descriptor: iface.transport.descriptor(),
                transport: iface.transport.statistics(),
                reassembly: r.statistics(),
                transfers_sent: iface.counters.transfers_sent.load(Ordering::Relaxed),
                send_failures: iface.counters.send_failures.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Stop the workers and close every transport. Idempotent.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for iface in &self.interfaces {
            iface.transport.close();
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                warn!("receive worker panicked");
            }
        }
        info!("redundant transport closed");
    }

    pub fn is_closed(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

impl Drop for RedundantTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_worker(
    index: usize,
    transport: Arc<dyn Transport>,
    tx: Sender<Inbound>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!(interface = index, transport = %transport.descriptor(), "receive worker started");
    while running.load(Ordering::SeqCst) {
        let frame = match transport.poll(poll_interval) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(TransportError::Closed) => {
                debug!(interface = index, "transport closed");
                break;
            }
            Err(err) => {
                warn!(interface = index, error = %err, "poll failed");
                thread::sleep(poll_interval);
                continue;
            }
        };

        let mut item = Inbound {
            interface: index,
            frame,
        };
        loop {
            match tx.send_timeout(item, poll_interval) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
    debug!(interface = index, "receive worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use busprims_transport::can::{CanTransport, VirtualCanBus};
    use busprims_transport::{DataSpecifier, Priority};

    const WAIT: Duration = Duration::from_secs(1);

    fn node(buses: &[&VirtualCanBus], id: u16) -> RedundantTransport {
        let transports: Vec<Arc<dyn Transport>> = buses
            .iter()
            .map(|bus| {
                Arc::new(CanTransport::new(bus.attach(), Some(id)).unwrap()) as Arc<dyn Transport>
            })
            .collect();
        RedundantTransport::new(transports, RedundancyConfig::default()).unwrap()
    }

    fn message(tid: u64, len: usize) -> Transfer {
        Transfer {
            timestamp: Instant::now(),
            priority: Priority::Nominal,
            data_specifier: DataSpecifier::message(100).unwrap(),
            source_node_id: Some(1),
            destination_node_id: None,
            transfer_id: tid,
            payload: (0..len).map(|i| i as u8).collect::<Vec<u8>>().into(),
        }
    }

    #[test]
    fn test_delivered_once_over_two_buses() {
        let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
        let tx = node(&[&bus_a, &bus_b], 1);
        let rx = node(&[&bus_a, &bus_b], 2);

        let sent = message(3, 40);
        tx.send(&sent, Instant::now() + WAIT).unwrap();

        let got = rx.receive(WAIT).unwrap().unwrap();
        assert_eq!(got.payload, sent.payload);
        assert!(rx.receive(Duration::from_millis(200)).unwrap().is_none());
        assert_eq!(rx.duplicates_discarded(), 1);
        let stats = rx.statistics();
        assert!(stats.iter().all(|s| s.reassembly.transfers == 1));
    }

    #[test]
    fn test_one_interface_down() {
        let (bus_a, bus_b) = (VirtualCanBus::new(), VirtualCanBus::new());
        let rx = node(&[&bus_a, &bus_b], 2);

        let down = bus_b.attach();
        down.set_online(false);
        let transports: Vec<Arc<dyn Transport>> = vec![
            Arc::new(CanTransport::new(bus_a.attach(), Some(1)).unwrap()),
            Arc::new(CanTransport::new(down, Some(1)).unwrap()),
        ];
        let tx = RedundantTransport::new(transports, RedundancyConfig::default()).unwrap();

        tx.send(&message(0, 3), Instant::now() + WAIT).unwrap();
        assert_eq!(rx.receive(WAIT).unwrap().unwrap().transfer_id, 0);
        let stats = tx.statistics();
        assert_eq!(stats[0].transfers_sent, 1);
        assert_eq!(stats[1].send_failures, 1);
    }

    #[test]
    fn test_all_interfaces_down_fails() {
        let bus = VirtualCanBus::new();
        let iface = bus.attach();
        iface.set_online(false);
        let link = RedundantTransport::new(
            vec![Arc::new(CanTransport::new(iface, Some(1)).unwrap())],
            RedundancyConfig::default(),
        )
        .unwrap();
        let err = link.send(&message(0, 3), Instant::now() + WAIT).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::MediaUnavailable(_))
        ));
    }

    #[test]
    fn test_node_id_mismatch_rejected() {
        let bus = VirtualCanBus::new();
        let transports: Vec<Arc<dyn Transport>> = vec![
            Arc::new(CanTransport::new(bus.attach(), Some(1)).unwrap()),
            Arc::new(CanTransport::new(bus.attach(), Some(2)).unwrap()),
        ];
        assert!(RedundantTransport::new(transports, RedundancyConfig::default()).is_err());
        assert!(RedundantTransport::new(Vec::new(), RedundancyConfig::default()).is_err());
    }

    #[test]
    fn test_statistics_readable_while_receiving() {
        let bus = VirtualCanBus::new();
        let link = node(&[&bus], 5);

        thread::scope(|scope| {
            let waiting = scope.spawn(|| link.receive(Duration::from_secs(2)));
            thread::sleep(Duration::from_millis(100));

            let started = Instant::now();
            assert_eq!(link.statistics().len(), 1);
            assert_eq!(link.duplicates_discarded(), 0);
            assert!(
                started.elapsed() < Duration::from_millis(500),
                "blocked for {:?}",
                started.elapsed()
            );
            assert!(waiting.join().unwrap().unwrap().is_none());
        });
    }

    #[test]
    fn test_close_stops_receive() {
        let bus = VirtualCanBus::new();
        let link = node(&[&bus], 5);
        assert_eq!(link.transfer_id_modulo(), TransferIdModulo::CAN);
        link.close();
        assert!(matches!(
            link.receive(Duration::from_millis(10)),
            Err(FrameError::Transport(TransportError::Closed))
        ));
        assert!(link.is_closed());
    }
}
