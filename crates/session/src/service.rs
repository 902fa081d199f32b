//! Request handlers exposed to the signaling front door

use contracts::EventPublisher;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::SessionError;
use crate::proxy::Proxy;
use crate::transport::{Negotiator, SessionDescription};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePeerConnectionRequest {
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePeerConnectionResponse {
    pub session_id: String,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartStreamRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStreamResponse {
    /// False when the fan-out was already running
    pub started: bool,
    pub sessions: usize,
}

/// The two operations offered to browsers through signaling
#[trait_variant::make(ProxyService: Send)]
pub trait LocalProxyService {
    async fn initiate_peer_connection(
        &self,
        request: InitiatePeerConnectionRequest,
    ) -> Result<InitiatePeerConnectionResponse, SessionError>;

    async fn start_stream(
        &self,
        request: StartStreamRequest,
    ) -> Result<StartStreamResponse, SessionError>;
}

impl<N, P> ProxyService for Proxy<N, P>
where
    N: Negotiator,
    P: EventPublisher + Sync + 'static,
{
    async fn initiate_peer_connection(
        &self,
        request: InitiatePeerConnectionRequest,
    ) -> Result<InitiatePeerConnectionResponse, SessionError> {
        let session = Proxy::initiate_peer_connection(self, request.offer).await?;
        Ok(InitiatePeerConnectionResponse {
            session_id: session.session_id.to_string(),
            answer: session.answer,
        })
    }

    #[instrument(name = "start_stream", skip_all)]
    async fn start_stream(
        &self,
        _request: StartStreamRequest,
    ) -> Result<StartStreamResponse, SessionError> {
        let started = self.start();
        let sessions = self.session_count();
        info!(started, sessions, "StartStream handled");
        Ok(StartStreamResponse { started, sessions })
    }
}
