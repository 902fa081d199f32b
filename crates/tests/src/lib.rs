//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 回环 e2e 测试（两个总线节点 + RTP 接入 + 代理 + 回环浏览器）
//! - 慢会话隔离、会话关闭幂等、垃圾输入容忍

#[cfg(test)]
mod contract_tests {
    use contracts::{Event, Payload, ProxyBlueprint};

    #[test]
    fn test_default_blueprint_is_valid() {
        let blueprint = ProxyBlueprint::default();
        config_loader::validate(&blueprint).unwrap();
    }

    #[test]
    fn test_event_frame_roundtrip() {
        let event = Event::new("camera/status", Payload::text("ready"));
        let frame = event.encode().unwrap();
        assert_eq!(Event::decode(&frame).unwrap(), event);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::net::{SocketAddr, UdpSocket};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{BusConfig, Event, Payload, ProxyBlueprint, RtpConfig, RtpPacket, SinkConfig};
    use eventbus::{BusSockets, EventBus};
    use ingestion::{BackpressureConfig, IngestionPipeline, RtpSource};
    use session::{
        ConnectionState, LoopbackNegotiator, LoopbackPeer, Proxy, ProxyConfig, SessionDescription,
        SessionState,
    };
    use tokio::sync::{mpsc, watch};
    use tokio::time::{sleep, timeout};

    const VP8_OFFER: &str = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn bus_config() -> BusConfig {
        BusConfig {
            announce_interval_ms: 50,
            peer_ttl_ms: 10_000,
            ..BusConfig::default()
        }
    }

    /// Two loopback bus nodes whose presence is addressed to each other.
    fn bus_pair(
        delivery: async_channel::Sender<Event>,
    ) -> (Arc<EventBus>, Arc<EventBus>) {
        let a = BusSockets::loopback().unwrap();
        let b = BusSockets::loopback().unwrap();
        let a_presence = a.presence_addr().unwrap();
        let b_presence = b.presence_addr().unwrap();
        let a = a.with_presence_dest(b_presence);
        let b = b.with_presence_dest(a_presence);
        (
            Arc::new(EventBus::from_sockets(bus_config(), a, Some(delivery)).unwrap()),
            Arc::new(EventBus::from_sockets(bus_config(), b, None).unwrap()),
        )
    }

    fn rtp(seq: u16, payload_type: u8) -> RtpPacket {
        let mut packet = RtpPacket {
            payload: Bytes::from(vec![seq as u8; 32]),
            ..Default::default()
        };
        packet.header.payload_type = payload_type;
        packet.header.sequence_number = seq;
        packet
    }

    async fn open_session<P>(
        proxy: &Proxy<LoopbackNegotiator, P>,
        peers: &mut mpsc::UnboundedReceiver<LoopbackPeer>,
    ) -> (String, LoopbackPeer, session::LoopbackRemote)
    where
        P: contracts::EventPublisher + Sync + 'static,
    {
        let initiated = proxy
            .initiate_peer_connection(SessionDescription::offer(VP8_OFFER))
            .await
            .unwrap();
        let peer = peers.recv().await.unwrap();
        let remote = peer.open_data_channel("events").await.unwrap();

        let id = initiated.session_id.to_string();
        let mut state = proxy.watch_session(&id).unwrap();
        state
            .wait_for(|s| *s != SessionState::Negotiating)
            .await
            .unwrap();
        assert_eq!(proxy.session_state(&id), Some(SessionState::Open));
        (id, peer, remote)
    }

    /// Bus B -> proxy -> browser, browser -> proxy -> bus B, and the RTP
    /// stream from the ingest socket to the browser track.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_loopback_proxy() {
        let mut blueprint = ProxyBlueprint::default();
        blueprint.rtp = RtpConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            read_buffer_bytes: 256 * 1024,
            ..RtpConfig::default()
        };
        let ssrc = blueprint.rtp.ssrc;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ingestion = IngestionPipeline::new(BackpressureConfig::from_blueprint(&blueprint));
        let source = RtpSource::bind(&blueprint.rtp).unwrap();
        let ingest_addr = source.local_addr().unwrap();
        let rtp_task = ingestion.spawn_rtp(source, stop_rx.clone());

        let (proxy_bus, remote_bus) = bus_pair(ingestion.event_sender());
        let bus_a = tokio::spawn(Arc::clone(&proxy_bus).run(stop_rx.clone()));
        let bus_b = tokio::spawn(Arc::clone(&remote_bus).run(stop_rx.clone()));

        let (negotiator, mut peers) = LoopbackNegotiator::new();
        let proxy = Proxy::new(
            negotiator,
            Arc::clone(&proxy_bus),
            ProxyConfig::from_blueprint(&blueprint),
            ingestion.take_rtp_receiver().unwrap(),
            ingestion.take_event_receiver().unwrap(),
            stop_rx,
        );
        assert!(proxy.start());

        let (_id, mut peer, mut remote) = open_session(&proxy, &mut peers).await;
        wait_until(|| proxy_bus.peer_count() > 0 && remote_bus.peer_count() > 0).await;

        // RTP: producer payload type 100 becomes the negotiated 96
        let producer = UdpSocket::bind("127.0.0.1:0").unwrap();
        producer
            .send_to(&rtp(7, 100).marshal(), ingest_addr)
            .unwrap();
        let received = timeout(Duration::from_secs(5), peer.recv_rtp())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.header.payload_type, 96);
        assert_eq!(received.header.sequence_number, 7);
        assert_eq!(received.header.ssrc, ssrc);

        // Bus -> browser
        let status = Event::new("robot/status", Payload::text("ready"));
        assert!(remote_bus.send_event(&status).await.unwrap() >= 1);
        let delivered = timeout(Duration::from_secs(5), remote.recv_event())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivered, status);

        // Browser -> bus
        let command = Event::new("robot/command", Payload::text("stop"));
        remote.send_event(&command).await.unwrap();
        wait_until(|| remote_bus.latest("robot/command").is_some()).await;
        assert_eq!(remote_bus.latest("robot/command"), Some(command));

        stop_tx.send(true).unwrap();
        rtp_task.await.unwrap();
        bus_a.await.unwrap();
        bus_b.await.unwrap();
        ingestion.close();
        let stats = proxy.shutdown().await;
        assert_eq!(stats.len(), 2);
        assert!(stats[0].items >= 1);
        assert!(proxy.rtp_sinks().is_empty());
    }

    struct Hub {
        proxy: Proxy<LoopbackNegotiator, EventBus>,
        peers: mpsc::UnboundedReceiver<LoopbackPeer>,
        rtp_tx: async_channel::Sender<RtpPacket>,
        _event_tx: async_channel::Sender<Event>,
        stop_tx: watch::Sender<bool>,
    }

    /// Proxy fed directly from channels, publishing to an unbound bus node.
    fn hub(sinks: SinkConfig) -> Hub {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (rtp_tx, rtp_rx) = async_channel::bounded(4096);
        let (event_tx, event_rx) = async_channel::bounded(64);
        let bus = EventBus::from_sockets(bus_config(), BusSockets::loopback().unwrap(), None)
            .unwrap();
        let config = ProxyConfig {
            sinks,
            ..ProxyConfig::default()
        };
        let (negotiator, peers) = LoopbackNegotiator::new();
        let proxy = Proxy::new(negotiator, Arc::new(bus), config, rtp_rx, event_rx, stop_rx);
        assert!(proxy.start());
        Hub {
            proxy,
            peers,
            rtp_tx,
            _event_tx: event_tx,
            stop_tx,
        }
    }

    /// A peer that never reads must not slow down or starve another peer.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_session_is_isolated() {
        let mut hub = hub(SinkConfig {
            rtp_queue_capacity: 64,
            ..SinkConfig::default()
        });
        let (slow_id, _slow_peer, _slow_remote) = open_session(&hub.proxy, &mut hub.peers).await;
        let (_fast_id, mut fast_peer, _fast_remote) =
            open_session(&hub.proxy, &mut hub.peers).await;

        const BATCH: u16 = 50;
        const BATCHES: u16 = 20;
        for batch in 0..BATCHES {
            for i in 0..BATCH {
                hub.rtp_tx.send(rtp(batch * BATCH + i, 96)).await.unwrap();
            }
            for i in 0..BATCH {
                let packet = timeout(Duration::from_secs(5), fast_peer.recv_rtp())
                    .await
                    .expect("fast peer stalled")
                    .unwrap();
                assert_eq!(packet.header.sequence_number, batch * BATCH + i);
            }
        }

        // The slow peer's track holds far fewer than 1000 packets
        let slow_closed = hub.proxy.session_state(&slow_id) == Some(SessionState::Closed);
        let dropped = hub.proxy.stats().rtp.dropped_count;
        assert!(slow_closed || dropped > 0);

        hub.stop_tx.send(true).unwrap();
        hub.proxy.shutdown().await;
    }

    /// Several close triggers racing each other leave exactly one clean teardown.
    #[tokio::test]
    async fn test_concurrent_close_triggers() {
        let mut hub = hub(SinkConfig::default());
        let (id, peer, mut remote) = open_session(&hub.proxy, &mut hub.peers).await;
        assert_eq!(hub.proxy.rtp_sinks().len(), 1);
        assert_eq!(hub.proxy.event_sinks().len(), 1);

        let mut state = hub.proxy.watch_session(&id).unwrap();
        remote.close();
        let _ = peer.set_state(ConnectionState::Failed).await;
        let _ = peer.set_state(ConnectionState::Closed).await;
        drop(peer);

        state.wait_for(|s| *s == SessionState::Closed).await.unwrap();
        assert!(hub.proxy.rtp_sinks().is_empty());
        assert!(hub.proxy.event_sinks().is_empty());
        assert_eq!(hub.proxy.session_count(), 0);

        // Later fan-out reaches nobody and nothing is re-registered
        hub.rtp_tx.send(rtp(1, 96)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(hub.proxy.rtp_sinks().is_empty());

        hub.stop_tx.send(true).unwrap();
        hub.proxy.shutdown().await;
    }

    /// Garbage on every inbound socket is skipped; valid traffic still flows.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_garbage_input_is_tolerated() {
        let config = RtpConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            read_buffer_bytes: 256 * 1024,
            ..RtpConfig::default()
        };
        let mut blueprint = ProxyBlueprint::default();
        blueprint.rtp = config.clone();

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ingestion = IngestionPipeline::new(BackpressureConfig::from_blueprint(&blueprint));
        let source = RtpSource::bind(&config).unwrap();
        let ingest_addr = source.local_addr().unwrap();
        let rtp_task = ingestion.spawn_rtp(source, stop_rx.clone());
        let rtp_rx = ingestion.take_rtp_receiver().unwrap();

        let (delivery_tx, delivery_rx) = async_channel::bounded(8);
        let (node, _other) = bus_pair(delivery_tx);
        let bus_task = tokio::spawn(Arc::clone(&node).run(stop_rx));
        let events_addr: SocketAddr = node.events_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[0xff, 0x00, 0x13], ingest_addr).unwrap();
        sender.send_to(b"not an event", events_addr).unwrap();

        sender.send_to(&rtp(3, 96).marshal(), ingest_addr).unwrap();
        let event = Event::new("after/garbage", Payload::text("ok"));
        sender
            .send_to(&event.encode().unwrap(), events_addr)
            .unwrap();

        let packet = timeout(Duration::from_secs(5), rtp_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet.header.sequence_number, 3);
        let delivered = timeout(Duration::from_secs(5), delivery_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, event);
        assert_eq!(ingestion.metrics().snapshot().parse_errors, 1);

        stop_tx.send(true).unwrap();
        rtp_task.await.unwrap();
        bus_task.await.unwrap();
    }
}
