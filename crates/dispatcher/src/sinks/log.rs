//! LogSink - logs item summaries via tracing

use contracts::{ContractError, DataSink, Event, RtpPacket};
use tracing::{debug, info, instrument};

/// Sink that logs RTP packet and event summaries for debugging
pub struct LogSink {
    name: String,
    items: u64,
}

impl LogSink {
    /// Create a new LogSink with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: 0,
        }
    }
}

impl DataSink<RtpPacket> for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, packet: RtpPacket) -> Result<(), ContractError> {
        self.items += 1;
        debug!(
            sink = %self.name,
            seq = packet.header.sequence_number,
            ts = packet.header.timestamp,
            pt = packet.header.payload_type,
            marker = packet.header.marker,
            bytes = packet.payload.len(),
            "RtpPacket received"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, packets = self.items, "LogSink closed");
        Ok(())
    }
}

impl DataSink<Event> for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, name = event.name())
    )]
    async fn write(&mut self, event: Event) -> Result<(), ContractError> {
        self.items += 1;
        let data = event.data();
        info!(
            sink = %self.name,
            stamp = %event.stamp(),
            type_url = %data.type_url,
            bytes = data.value.len(),
            text = data.as_text().unwrap_or_default(),
            "Event received"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, events = self.items, "LogSink closed");
        Ok(())
    }
}
