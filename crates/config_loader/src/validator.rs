//! 配置校验模块
//!
//! 校验规则：
//! - bus.multicast_group 必须是 IPv4 组播地址
//! - peer_ttl_ms 必须大于 announce_interval_ms
//! - 所有队列容量 > 0
//! - session.codec 非空
//! - data_channel_frame_bytes 位于 64..=65507

use std::ops::RangeInclusive;

use contracts::{ContractError, ProxyBlueprint};

/// 数据通道单帧大小的合法范围 (最大值为 UDP 负载上限)
pub const FRAME_BYTES_RANGE: RangeInclusive<usize> = 64..=65507;

/// 校验 ProxyBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &ProxyBlueprint) -> Result<(), ContractError> {
    validate_bus(blueprint)?;
    validate_capacities(blueprint)?;
    validate_session(blueprint)?;
    Ok(())
}

/// 校验总线配置
fn validate_bus(blueprint: &ProxyBlueprint) -> Result<(), ContractError> {
    let bus = &blueprint.bus;

    if !bus.multicast_group.ip().is_multicast() {
        return Err(ContractError::config_validation(
            "bus.multicast_group",
            format!("{} is not an IPv4 multicast address", bus.multicast_group),
        ));
    }

    if bus.announce_interval_ms == 0 {
        return Err(ContractError::config_validation(
            "bus.announce_interval_ms",
            "announce_interval_ms must be > 0",
        ));
    }

    // 否则对端会在两次公告之间被误判为过期
    if bus.peer_ttl_ms <= bus.announce_interval_ms {
        return Err(ContractError::config_validation(
            "bus.peer_ttl_ms",
            format!(
                "peer_ttl_ms ({}) must be greater than announce_interval_ms ({})",
                bus.peer_ttl_ms, bus.announce_interval_ms
            ),
        ));
    }

    if bus.service.trim().is_empty() {
        return Err(ContractError::config_validation(
            "bus.service",
            "service name cannot be empty",
        ));
    }
    Ok(())
}

/// 校验队列容量
fn validate_capacities(blueprint: &ProxyBlueprint) -> Result<(), ContractError> {
    let capacities = [
        ("bus.delivery_queue_capacity", blueprint.bus.delivery_queue_capacity),
        ("rtp.queue_capacity", blueprint.rtp.queue_capacity),
        ("rtp.read_buffer_bytes", blueprint.rtp.read_buffer_bytes),
        ("sinks.rtp_queue_capacity", blueprint.sinks.rtp_queue_capacity),
        ("sinks.event_queue_capacity", blueprint.sinks.event_queue_capacity),
    ];
    for (field, value) in capacities {
        if value == 0 {
            return Err(ContractError::config_validation(
                field,
                format!("{field} must be > 0"),
            ));
        }
    }
    Ok(())
}

/// 校验会话配置
fn validate_session(blueprint: &ProxyBlueprint) -> Result<(), ContractError> {
    let session = &blueprint.session;

    if session.codec.trim().is_empty() {
        return Err(ContractError::config_validation(
            "session.codec",
            "codec cannot be empty",
        ));
    }

    if !FRAME_BYTES_RANGE.contains(&session.data_channel_frame_bytes) {
        return Err(ContractError::config_validation(
            "session.data_channel_frame_bytes",
            format!(
                "data_channel_frame_bytes must be within {}..={}, got {}",
                FRAME_BYTES_RANGE.start(),
                FRAME_BYTES_RANGE.end(),
                session.data_channel_frame_bytes
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn test_valid_config() {
        let bp = ProxyBlueprint::default();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_unicast_group_rejected() {
        let mut bp = ProxyBlueprint::default();
        bp.bus.multicast_group = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 10000);
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("not an IPv4 multicast address"), "got: {err}");
    }

    #[test]
    fn test_ttl_must_exceed_interval() {
        let mut bp = ProxyBlueprint::default();
        bp.bus.announce_interval_ms = 1000;
        bp.bus.peer_ttl_ms = 1000;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("must be greater than"), "got: {err}");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut bp = ProxyBlueprint::default();
        bp.sinks.event_queue_capacity = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("sinks.event_queue_capacity"), "got: {err}");
    }

    #[test]
    fn test_empty_codec_rejected() {
        let mut bp = ProxyBlueprint::default();
        bp.session.codec = "  ".into();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("codec cannot be empty"), "got: {err}");
    }

    #[test]
    fn test_frame_size_bounds() {
        let mut bp = ProxyBlueprint::default();
        bp.session.data_channel_frame_bytes = 63;
        assert!(validate(&bp).is_err());
        bp.session.data_channel_frame_bytes = 64;
        assert!(validate(&bp).is_ok());
        bp.session.data_channel_frame_bytes = 65507;
        assert!(validate(&bp).is_ok());
        bp.session.data_channel_frame_bytes = 65508;
        assert!(validate(&bp).is_err());
    }
}
