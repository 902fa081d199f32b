//! # EventBus
//!
//! LAN pub/sub bus.
//!
//! 负责：
//! - 组播 presence 通告，维护存活节点表
//! - 过期节点清除 (ttl)
//! - 单播事件复制到所有存活节点
//! - 本地状态：每个事件名保留最新一条

mod bus;
mod error;
mod socket;
mod table;

pub use bus::EventBus;
pub use error::{BusError, Result};
pub use socket::BusSockets;
pub use table::{delivery_addr, AnnouncementTable};
