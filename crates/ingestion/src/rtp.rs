//! RTP ingest socket reader

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use contracts::{DropPolicy, RtpConfig, RtpPacket, MAX_RTP_PACKET_SIZE};
use metrics::counter;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backpressure::{offer, Offer};
use crate::config::IngestionMetrics;
use crate::error::{IngestionError, Result};

/// Source of the inbound media stream
///
/// Reads RTP datagrams from a unicast or multicast address, drops
/// malformed packets and stamps the configured stream SSRC on the rest.
pub struct RtpSource {
    socket: UdpSocket,
    ssrc: u32,
}

impl RtpSource {
    /// Bind the ingest socket. Must be called inside a tokio runtime.
    pub fn bind(config: &RtpConfig) -> Result<Self> {
        let socket = bind_ingest_socket(config.listen, config.read_buffer_bytes)?;
        let socket = UdpSocket::from_std(socket)?;
        info!(listen = %config.listen, ssrc = config.ssrc, "rtp source bound");
        Ok(Self {
            socket,
            ssrc: config.ssrc,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Read packets into `tx` until shutdown or a socket error.
    #[instrument(name = "rtp_source_run", skip_all, fields(ssrc = self.ssrc))]
    pub(crate) async fn run(
        self,
        tx: Sender<RtpPacket>,
        evict: Receiver<RtpPacket>,
        drop_policy: DropPolicy,
        metrics: Arc<IngestionMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; MAX_RTP_PACKET_SIZE];
        loop {
            let received = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, source) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!(error = %e, "rtp socket read failed, source stopping");
                    break;
                }
            };

            metrics.record_received();
            counter!("webrtc_proxy_rtp_packets_received_total").increment(1);

            let mut packet = match RtpPacket::parse(Bytes::copy_from_slice(&buf[..len])) {
                Ok(packet) => packet,
                Err(e) => {
                    reject_malformed(&metrics, source, len, &e);
                    continue;
                }
            };
            packet.header.ssrc = self.ssrc;

            match offer(&tx, &evict, packet, drop_policy) {
                Offer::Queued => trace!(bytes = len, "rtp packet queued"),
                Offer::DroppedOldest | Offer::DroppedNewest => {
                    metrics.record_dropped();
                    trace!(policy = ?drop_policy, "rtp queue full, packet dropped");
                }
                Offer::Closed => {
                    warn!("rtp channel closed, source stopping");
                    break;
                }
            }
            metrics.update_queue_len(tx.len());
        }
        debug!("rtp source stopped");
    }
}

fn bind_ingest_socket(listen: SocketAddr, read_buffer_bytes: usize) -> Result<std::net::UdpSocket> {
    let bind_err = |source| IngestionError::Bind {
        addr: listen,
        source,
    };

    let socket =
        Socket::new(Domain::for_address(listen), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    if let Err(e) = socket.set_recv_buffer_size(read_buffer_bytes) {
        warn!(requested = read_buffer_bytes, error = %e, "could not size rtp receive buffer");
    }
    socket.set_nonblocking(true).map_err(bind_err)?;

    match listen {
        SocketAddr::V4(v4) if v4.ip().is_multicast() => {
            let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, v4.port()));
            socket.bind(&any.into()).map_err(bind_err)?;
            socket
                .join_multicast_v4(v4.ip(), &Ipv4Addr::UNSPECIFIED)
                .map_err(|source| IngestionError::JoinGroup {
                    group: listen,
                    source,
                })?;
        }
        _ => socket.bind(&listen.into()).map_err(bind_err)?,
    }

    Ok(socket.into())
}

fn reject_malformed(
    metrics: &IngestionMetrics,
    source: SocketAddr,
    len: usize,
    error: &contracts::ContractError,
) {
    metrics.record_parse_error();
    counter!("webrtc_proxy_rtp_decode_errors_total").increment(1);
    debug!(peer = %source, bytes = len, error = %error, "dropping malformed rtp packet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IngestionPipeline;
    use crate::config::BackpressureConfig;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback_config(ssrc: u32) -> RtpConfig {
        RtpConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            read_buffer_bytes: 256 * 1024,
            ssrc,
            queue_capacity: 16,
        }
    }

    fn packet(seq: u16, ssrc: u32) -> Vec<u8> {
        let mut raw = vec![0x80, 96];
        raw.extend_from_slice(&seq.to_be_bytes());
        raw.extend_from_slice(&1000u32.to_be_bytes());
        raw.extend_from_slice(&ssrc.to_be_bytes());
        raw.extend_from_slice(b"frame");
        raw
    }

    #[tokio::test]
    async fn test_rtp_source_overrides_ssrc_and_skips_garbage() {
        let source = RtpSource::bind(&loopback_config(0xabcd)).unwrap();
        let target = source.local_addr().unwrap();

        let mut pipeline = IngestionPipeline::new(BackpressureConfig::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = pipeline.spawn_rtp(source, stop_rx);
        let rx = pipeline.take_rtp_receiver().unwrap();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&packet(1, 7), target).unwrap();
        sender.send_to(&[0x00, 0x01, 0x02], target).unwrap();
        sender.send_to(&packet(2, 8), target).unwrap();

        for expected_seq in [1, 2] {
            let packet = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(packet.header.sequence_number, expected_seq);
            assert_eq!(packet.header.ssrc, 0xabcd);
            assert_eq!(&packet.payload[..], b"frame");
        }

        let metrics = pipeline.metrics().snapshot();
        assert_eq!(metrics.packets_received, 3);
        assert_eq!(metrics.parse_errors, 1);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_malformed_packet_counted_under_rtp_metric() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let ingest = IngestionMetrics::default();
        let err = RtpPacket::parse(Bytes::from_static(&[0x00, 0x01, 0x02])).unwrap_err();

        metrics::with_local_recorder(&recorder, || {
            reject_malformed(&ingest, "127.0.0.1:9".parse().unwrap(), 3, &err);
        });

        let rendered = handle.render();
        assert!(rendered.contains("webrtc_proxy_rtp_decode_errors_total 1"));
        assert!(!rendered.contains("bus_decode_errors"));
        assert_eq!(ingest.snapshot().parse_errors, 1);
    }
}
