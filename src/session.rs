//! One session per accepted connection. Reads the handshake, answers status
//! queries out of the lifecycle snapshot, and turns login attempts into
//! wake-up triggers before kicking the player with an explanation.

use std::{net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tracing::{debug, info, trace};

use crate::{
    config::Config,
    lifecycle::{Lifecycle, LoginAttempt},
    protocol::{
        ProtocolError, codec,
        packets::{self, Frame, Handshake, LoginStart, NextState},
    },
    status,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("peer went silent")]
    ReadTimeout,
    #[error("peer stopped reading")]
    WriteTimeout,
    #[error("payload could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingHandshake,
    AwaitingStatusRequest,
    AwaitingPing,
    AwaitingLogin,
    Closed,
}

/// Generic over the stream so tests can run sessions over an in-memory pipe.
pub struct Session<S> {
    stream: S,
    remote: SocketAddr,
    config: Arc<Config>,
    lifecycle: Lifecycle,
    state: SessionState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, remote: SocketAddr, config: Arc<Config>, lifecycle: Lifecycle) -> Self {
        Self {
            stream,
            remote,
            config,
            lifecycle,
            state: SessionState::AwaitingHandshake,
        }
    }

    /// Runs the session to completion. The stream is shut down on every path
    /// out of here, errors included.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let result = self.drive().await;
        if let Err(err) = self.stream.shutdown().await {
            // happens routinely on sockets the peer already tore down
            debug!("shutdown for {} failed: {err}", self.remote);
        }
        result
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        while self.state != SessionState::Closed {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(SessionError::Protocol(ProtocolError::TruncatedRead))
                    if self.state == SessionState::AwaitingPing =>
                {
                    // pinging after the status response is optional
                    trace!("{} hung up without pinging", self.remote);
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            self.handle_frame(frame).await?;
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, SessionError> {
        let limit = self.config.listen.read_timeout();
        match timeout(limit, packets::read_frame(&mut self.stream)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::ReadTimeout),
        }
    }

    /// Same deadline on the way out. A peer that stops draining its receive
    /// window must not pin the session once the response outgrows the kernel
    /// buffers.
    async fn write_frame(&mut self, id: i32, body: &[u8]) -> Result<(), SessionError> {
        let limit = self.config.listen.read_timeout();
        match timeout(limit, packets::write_frame(&mut self.stream, id, body)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::WriteTimeout),
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingHandshake => self.on_handshake(frame),
            SessionState::AwaitingStatusRequest => self.on_status_request(frame).await,
            SessionState::AwaitingPing => self.on_ping(frame).await,
            SessionState::AwaitingLogin => self.on_login(frame).await,
            SessionState::Closed => Ok(()),
        }
    }

    fn on_handshake(&mut self, frame: Frame) -> Result<(), SessionError> {
        if frame.id != packets::HANDSHAKE_ID {
            return Err(ProtocolError::UnexpectedPacket(frame.id).into());
        }
        let handshake = Handshake::decode(&frame.body)?;
        trace!(
            "{} handshake: protocol {} for {}:{}",
            self.remote,
            handshake.protocol_version,
            handshake.server_address,
            handshake.server_port
        );
        self.state = match handshake.next_state {
            NextState::Status => SessionState::AwaitingStatusRequest,
            NextState::Login => SessionState::AwaitingLogin,
        };
        Ok(())
    }

    async fn on_status_request(&mut self, frame: Frame) -> Result<(), SessionError> {
        if frame.id != packets::STATUS_REQUEST_ID {
            return Err(ProtocolError::UnexpectedPacket(frame.id).into());
        }
        if !frame.body.is_empty() {
            return Err(ProtocolError::TrailingData(frame.body.len()).into());
        }

        let snapshot = self.lifecycle.snapshot();
        let response = status::build_status(&snapshot, &self.config.status);
        let json = serde_json::to_string(&response)?;

        let mut body = Vec::with_capacity(json.len() + 5);
        codec::write_string(&mut body, &json);
        self.write_frame(packets::STATUS_RESPONSE_ID, &body).await?;

        debug!("served status to {} ({:?})", self.remote, snapshot.phase);
        self.state = SessionState::AwaitingPing;
        Ok(())
    }

    async fn on_ping(&mut self, frame: Frame) -> Result<(), SessionError> {
        if frame.id != packets::PING_ID {
            return Err(ProtocolError::UnexpectedPacket(frame.id).into());
        }
        let token = packets::decode_ping(&frame.body)?;

        let mut body = Vec::with_capacity(8);
        codec::write_long(&mut body, token);
        self.write_frame(packets::PONG_ID, &body).await?;

        self.state = SessionState::Closed;
        Ok(())
    }

    async fn on_login(&mut self, frame: Frame) -> Result<(), SessionError> {
        if frame.id != packets::LOGIN_START_ID {
            return Err(ProtocolError::UnexpectedPacket(frame.id).into());
        }
        let login = LoginStart::decode(&frame.body)?;
        info!("login attempt by {} from {}", login.player_name, self.remote);

        // the reason is picked before the trigger lands, so the player who
        // caused the wake-up reads "starting now" and later ones "still
        // starting"
        let snapshot = self.lifecycle.snapshot();
        let reason = status::build_disconnect(&snapshot, &self.config.status);
        self.lifecycle.notify_login(LoginAttempt {
            player_name: login.player_name,
            source: self.remote,
        });

        let json = serde_json::to_string(&reason)?;
        let mut body = Vec::with_capacity(json.len() + 5);
        codec::write_string(&mut body, &json);
        self.write_frame(packets::DISCONNECT_ID, &body).await?;

        self.state = SessionState::Closed;
        Ok(())
    }
}
