//! Ingestion 错误类型

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// RTP socket 绑定失败
    #[error("failed to bind rtp socket on {addr}: {source}")]
    Bind {
        /// 监听地址
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 加入组播组失败
    #[error("failed to join rtp multicast group {group}: {source}")]
    JoinGroup {
        /// 组播地址
        group: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 通道已关闭
    #[error("{stream} channel closed")]
    ChannelClosed {
        /// 流类型
        stream: &'static str,
    },

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
