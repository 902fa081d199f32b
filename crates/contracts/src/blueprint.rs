//! ProxyBlueprint - Config Loader 输出
//!
//! 描述完整的代理配置：事件总线、RTP 接入、会话协商、输出队列。

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Bus multicast group (presence)
pub const DEFAULT_BUS_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 20, 20, 21), 10000);
/// RTP ingest address
pub const DEFAULT_RTP_LISTEN: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(239, 20, 20, 20), 5000));
pub const DEFAULT_SERVICE_NAME: &str = "webrtc-proxy";
/// SSRC stamped on every forwarded RTP packet
pub const DEFAULT_STREAM_SSRC: u32 = 0x5f4e_2a11;

/// 完整的代理配置蓝图
///
/// 所有字段都有默认值，空文件即为合法配置。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyBlueprint {
    /// 事件总线配置
    pub bus: BusConfig,

    /// RTP 接入配置
    pub rtp: RtpConfig,

    /// 会话协商配置
    pub session: SessionConfig,

    /// 输出队列配置
    pub sinks: SinkConfig,
}

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 组播地址 (presence)
    pub multicast_group: SocketAddrV4,

    /// 加入组播所用的本地接口
    pub interface: Ipv4Addr,

    /// 本节点通告的服务名
    pub service: String,

    /// 通告周期 (毫秒)
    pub announce_interval_ms: u64,

    /// 节点过期时间 (毫秒)，必须大于通告周期
    pub peer_ttl_ms: u64,

    /// 事件单播目标的选取方式
    pub delivery_target: DeliveryTarget,

    /// 本地事件投递队列容量
    pub delivery_queue_capacity: usize,

    /// 是否接收本机发出的组播
    pub multicast_loop: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            multicast_group: DEFAULT_BUS_GROUP,
            interface: Ipv4Addr::UNSPECIFIED,
            service: DEFAULT_SERVICE_NAME.to_string(),
            announce_interval_ms: 1_000,
            peer_ttl_ms: 10_000,
            delivery_target: DeliveryTarget::default(),
            delivery_queue_capacity: 256,
            multicast_loop: true,
        }
    }
}

impl BusConfig {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }
}

/// 事件单播目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// 通告包的 UDP 源 IP + 通告中的端口
    #[default]
    SourceHost,
    /// 通告中的 host + port（host 无效时回退到源 IP）
    SelfReported,
}

/// RTP 接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    /// 监听地址，单播或组播
    pub listen: SocketAddr,

    /// socket 接收缓冲区大小 (字节)
    pub read_buffer_bytes: usize,

    /// 固定的流 SSRC
    pub ssrc: u32,

    /// 接入队列容量
    pub queue_capacity: usize,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_RTP_LISTEN,
            read_buffer_bytes: 8 * 1024 * 1024,
            ssrc: DEFAULT_STREAM_SSRC,
            queue_capacity: 1024,
        }
    }
}

/// 会话协商配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 视频编码名称 (e.g., "VP8")
    pub codec: String,

    /// 数据通道单帧最大字节数
    pub data_channel_frame_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            codec: "VP8".to_string(),
            data_channel_frame_bytes: 1024,
        }
    }
}

/// 输出队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// 每个会话的 RTP 队列容量
    pub rtp_queue_capacity: usize,

    /// 每个会话的事件队列容量
    pub event_queue_capacity: usize,

    /// 丢包策略
    pub drop_policy: DropPolicy,

    /// 连续丢包达到该值后断开会话，0 表示从不断开
    pub max_consecutive_drops: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            rtp_queue_capacity: 512,
            event_queue_capacity: 64,
            drop_policy: DropPolicy::default(),
            max_consecutive_drops: 0,
        }
    }
}

/// 丢包策略 (背压满时)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// 丢弃最旧的包
    #[default]
    DropOldest,
    /// 丢弃最新的包
    DropNewest,
}
