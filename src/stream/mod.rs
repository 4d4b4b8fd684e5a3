#[cfg(test)]
mod stream_test;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use util::{Marshal, Unmarshal};

use crate::error::{Error, Result};
use crate::INBOUND_MTU;

/// How long a reader waits for a datagram before giving up. Idle sessions
/// must eventually release their sockets.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Capacity of the inbound RTP queue, the single exchange point between the
/// RTP reader task and the sample provider.
const RTP_QUEUE_CAPACITY: usize = 65535;

/// Compile-time switch for logging RTCP received from the peer.
const LOG_PEER_RTCP: bool = false;

/// One remote-address slot: unset until the first datagram arrives, then set
/// exactly once. Close poisons a still-unset gate so waiters don't hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrGate {
    Pending,
    Addr(SocketAddr),
    Closed,
}

fn set_gate(gate: &watch::Sender<AddrGate>, addr: SocketAddr) {
    gate.send_if_modified(|g| {
        if *g == AddrGate::Pending {
            *g = AddrGate::Addr(addr);
            true
        } else {
            false
        }
    });
}

async fn wait_gate(gate: &watch::Sender<AddrGate>) -> Result<SocketAddr> {
    let mut rx = gate.subscribe();
    let g = rx
        .wait_for(|g| *g != AddrGate::Pending)
        .await
        .map_err(|_| Error::ErrStreamClosed)?;
    match *g {
        AddrGate::Addr(addr) => Ok(addr),
        _ => Err(Error::ErrStreamClosed),
    }
}

/// UdpStream owns the two UDP sockets of one session: it runs a background
/// reader per socket, learns the peer's addresses from the first datagram on
/// each, queues parsed inbound RTP, and writes outbound RTP once the remote
/// address is known.
pub struct UdpStream {
    conn_rtp: Arc<UdpSocket>,
    conn_rtcp: Arc<UdpSocket>,

    r_addr_rtp: Arc<watch::Sender<AddrGate>>,
    r_addr_rtcp: Arc<watch::Sender<AddrGate>>,

    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,

    rtp_queue: Mutex<mpsc::Receiver<rtp::packet::Packet>>,
}

impl UdpStream {
    /// new takes two already-bound sockets and spawns their readers.
    pub fn new(conn_rtp: Arc<UdpSocket>, conn_rtcp: Arc<UdpSocket>) -> Arc<Self> {
        let (pkt_tx, pkt_rx) = mpsc::channel(RTP_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (rtp_gate_tx, _) = watch::channel(AddrGate::Pending);
        let (rtcp_gate_tx, _) = watch::channel(AddrGate::Pending);

        let stream = Arc::new(UdpStream {
            conn_rtp,
            conn_rtcp,
            r_addr_rtp: Arc::new(rtp_gate_tx),
            r_addr_rtcp: Arc::new(rtcp_gate_tx),
            closed: AtomicBool::new(false),
            shutdown_tx,
            rtp_queue: Mutex::new(pkt_rx),
        });

        tokio::spawn(rtp_read_loop(
            Arc::clone(&stream.conn_rtp),
            Arc::clone(&stream.r_addr_rtp),
            pkt_tx,
            shutdown_rx.clone(),
        ));
        tokio::spawn(rtcp_read_loop(
            Arc::clone(&stream.conn_rtcp),
            Arc::clone(&stream.r_addr_rtcp),
            shutdown_rx,
        ));

        stream
    }

    /// close is idempotent: the first call signals both readers to exit,
    /// which closes the RTP queue and poisons unfulfilled address gates.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("udp stream already closed");
            return;
        }

        let _ = self.shutdown_tx.send(true);
        self.r_addr_rtp.send_if_modified(|g| {
            if *g == AddrGate::Pending {
                *g = AddrGate::Closed;
                true
            } else {
                false
            }
        });
        self.r_addr_rtcp.send_if_modified(|g| {
            if *g == AddrGate::Pending {
                *g = AddrGate::Closed;
                true
            } else {
                false
            }
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// get_remote_addr_rtp blocks until the first RTP datagram has revealed
    /// the peer's address. Never yields a placeholder address; a stream
    /// closed before learning one returns ErrStreamClosed.
    pub async fn get_remote_addr_rtp(&self) -> Result<SocketAddr> {
        wait_gate(&self.r_addr_rtp).await
    }

    /// get_remote_addr_rtcp is the RTCP counterpart of get_remote_addr_rtp.
    pub async fn get_remote_addr_rtcp(&self) -> Result<SocketAddr> {
        wait_gate(&self.r_addr_rtcp).await
    }

    /// set_remote_addr_rtp records the peer's RTP address. Only the first
    /// call takes effect.
    pub fn set_remote_addr_rtp(&self, addr: SocketAddr) {
        set_gate(&self.r_addr_rtp, addr);
    }

    /// set_remote_addr_rtcp records the peer's RTCP address. Only the first
    /// call takes effect.
    pub fn set_remote_addr_rtcp(&self, addr: SocketAddr) {
        set_gate(&self.r_addr_rtcp, addr);
    }

    /// write_rtp marshals one packet and sends it to the learned remote RTP
    /// address, blocking until that address is known.
    pub async fn write_rtp(&self, header: &rtp::header::Header, payload: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::ErrStreamClosed);
        }

        let r_addr = self.get_remote_addr_rtp().await?;

        let pkt = rtp::packet::Packet {
            header: header.clone(),
            payload: bytes::Bytes::copy_from_slice(payload),
        };
        let data = pkt.marshal()?;

        let n = self.conn_rtp.send_to(&data, r_addr).await?;
        Ok(n)
    }

    /// read_rtp pops one inbound packet off the queue and copies it into the
    /// caller's buffers, returning the copied payload length. Once the
    /// readers have exited and the queue is drained it returns
    /// ErrStreamClosed on every call.
    pub async fn read_rtp(
        &self,
        header: &mut rtp::header::Header,
        payload: &mut [u8],
    ) -> Result<usize> {
        let pkt = {
            let mut queue = self.rtp_queue.lock().await;
            queue.recv().await.ok_or(Error::ErrStreamClosed)?
        };

        let n = pkt.payload.len().min(payload.len());
        payload[..n].copy_from_slice(&pkt.payload[..n]);
        *header = pkt.header;

        Ok(n)
    }
}

async fn rtp_read_loop(
    conn: Arc<UdpSocket>,
    gate: Arc<watch::Sender<AddrGate>>,
    pkt_tx: mpsc::Sender<rtp::packet::Packet>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buff = vec![0u8; INBOUND_MTU];

    loop {
        let (n, r_addr) = tokio::select! {
            _ = shutdown_rx.changed() => {
                log::debug!("rtp connection closed, stopping read loop");
                return;
            }
            res = timeout(READ_DEADLINE, conn.recv_from(&mut buff)) => match res {
                Err(_) => {
                    log::debug!("rtp read deadline reached, stopping read loop");
                    return;
                }
                Ok(Err(err)) => {
                    log::warn!("rtp read failed: {err}");
                    return;
                }
                Ok(Ok(pair)) => pair,
            },
        };

        set_gate(&gate, r_addr);

        let mut raw = &buff[..n];
        let pkt = match rtp::packet::Packet::unmarshal(&mut raw) {
            Ok(pkt) => pkt,
            Err(err) => {
                log::warn!("rtp unmarshal error: {err}");
                continue;
            }
        };

        // Blocking push: a slow provider backpressures the reader. The
        // sender drops when this task returns, which closes the queue.
        if pkt_tx.send(pkt).await.is_err() {
            return;
        }
    }
}

async fn rtcp_read_loop(
    conn: Arc<UdpSocket>,
    gate: Arc<watch::Sender<AddrGate>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buff = vec![0u8; INBOUND_MTU];

    loop {
        let (n, r_addr) = tokio::select! {
            _ = shutdown_rx.changed() => {
                log::debug!("rtcp connection closed, stopping read loop");
                return;
            }
            res = timeout(READ_DEADLINE, conn.recv_from(&mut buff)) => match res {
                Err(_) => {
                    log::debug!("rtcp read deadline reached, stopping read loop");
                    return;
                }
                Ok(Err(err)) => {
                    log::warn!("rtcp read error: {err}");
                    return;
                }
                Ok(Ok(pair)) => pair,
            },
        };

        set_gate(&gate, r_addr);

        let mut raw = &buff[..n];
        let pkts = match rtcp::packet::unmarshal(&mut raw) {
            Ok(pkts) => pkts,
            Err(err) => {
                log::warn!("rtcp unmarshal error: {err}");
                continue;
            }
        };

        if !LOG_PEER_RTCP {
            continue;
        }

        for p in pkts {
            log::trace!("got rtcp from {r_addr}: {p}");
        }
    }
}
