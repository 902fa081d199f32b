//! EventBus 错误类型

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;

/// EventBus 错误
#[derive(Debug, Error)]
pub enum BusError {
    /// socket 绑定失败 (启动时致命)
    #[error("failed to bind {what} socket on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 加入组播组失败
    #[error("failed to join multicast group {group} on {interface}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        interface: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    /// 编解码错误
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl BusError {
    pub(crate) fn bind(what: &'static str, addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { what, addr, source }
    }
}

/// EventBus Result 类型别名
pub type Result<T> = std::result::Result<T, BusError>;
