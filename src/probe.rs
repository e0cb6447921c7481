//! Asks the backing server for its status the same way a real client would:
//! handshake, status request, parse the JSON that comes back.

use std::{
    io::{self, Cursor},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{net::TcpStream, time::timeout};
use tracing::trace;

use crate::{
    config::ProbeConfig,
    protocol::{
        ProtocolError, codec,
        packets::{self, Handshake, NextState},
    },
};

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The server isn't taking connections yet, or cut us off mid-exchange.
    /// Expected while it boots, callers poll through this one.
    #[error("backing server not reachable: {0}")]
    NotReady(io::Error),
    #[error("malformed status exchange: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("status response is not a status document: {0}")]
    BadPayload(String),
}

/// Socket trouble mid-exchange reads the same as a refused connection: the
/// server isn't serving yet. Only a reply we actually received but could not
/// make sense of counts as a protocol error.
fn stream_not_ready(err: ProtocolError) -> ProbeError {
    match err {
        ProtocolError::Io(err) => ProbeError::NotReady(err),
        ProtocolError::TruncatedRead => ProbeError::NotReady(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-exchange",
        )),
        other => ProbeError::Protocol(other),
    }
}

/// What a status probe learned about the backing server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingStatus {
    pub online_players: i32,
    pub max_players: i32,
    pub protocol_version: Option<i32>,
}

#[async_trait]
pub trait StatusProber: Send + Sync + 'static {
    async fn query(&self) -> Result<BackingStatus, ProbeError>;
}

pub struct PingProber {
    addr: String,
    port: u16,
    protocol_version: i32,
    timeout: Duration,
}

impl PingProber {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            addr: config.addr.clone(),
            port: config.port,
            protocol_version: config.protocol_version,
            timeout: config.timeout(),
        }
    }

    async fn exchange(&self) -> Result<BackingStatus, ProbeError> {
        let mut stream = TcpStream::connect((self.addr.as_str(), self.port))
            .await
            .map_err(ProbeError::NotReady)?;

        let handshake = Handshake {
            protocol_version: self.protocol_version,
            server_address: self.addr.clone(),
            server_port: self.port,
            next_state: NextState::Status,
        };
        packets::write_frame(&mut stream, packets::HANDSHAKE_ID, &handshake.encode())
            .await
            .map_err(stream_not_ready)?;
        packets::write_frame(&mut stream, packets::STATUS_REQUEST_ID, &[])
            .await
            .map_err(stream_not_ready)?;

        let frame = packets::read_frame(&mut stream)
            .await
            .map_err(stream_not_ready)?;
        if frame.id != packets::STATUS_RESPONSE_ID {
            return Err(ProtocolError::UnexpectedPacket(frame.id).into());
        }
        let json = codec::read_string(&mut Cursor::new(frame.body.as_slice()))?;
        trace!("status probe answered: {json}");
        parse_status(&json)
    }
}

#[async_trait]
impl StatusProber for PingProber {
    async fn query(&self) -> Result<BackingStatus, ProbeError> {
        match timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::NotReady(io::Error::new(
                io::ErrorKind::TimedOut,
                "probe deadline elapsed",
            ))),
        }
    }
}

/// `players.online` is the one field the orchestrator can't live without,
/// everything else degrades gracefully.
fn parse_status(json: &str) -> Result<BackingStatus, ProbeError> {
    let data: serde_json::Value =
        serde_json::from_str(json).map_err(|err| ProbeError::BadPayload(err.to_string()))?;

    let players = data.get("players");
    let online_players = players
        .and_then(|players| players.get("online"))
        .and_then(|online| online.as_i64())
        .ok_or_else(|| ProbeError::BadPayload("missing players.online".to_string()))?;
    let max_players = players
        .and_then(|players| players.get("max"))
        .and_then(|max| max.as_i64())
        .unwrap_or_default();
    let protocol_version = data
        .get("version")
        .and_then(|version| version.get("protocol"))
        .and_then(|protocol| protocol.as_i64())
        .map(|protocol| protocol as i32);

    Ok(BackingStatus {
        online_players: online_players as i32,
        max_players: max_players as i32,
        protocol_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_a_vanilla_status() {
        let status = parse_status(
            r#"{
                "version": {"name": "1.17.2", "protocol": 756},
                "players": {"max": 20, "online": 3, "sample": []},
                "description": {"text": "a survival server"}
            }"#,
        )
        .unwrap();
        assert_eq!(
            status,
            BackingStatus {
                online_players: 3,
                max_players: 20,
                protocol_version: Some(756),
            }
        );
    }

    #[test]
    fn test_tolerates_missing_version_block() {
        let status = parse_status(r#"{"players": {"online": 0}}"#).unwrap();
        assert_eq!(status.online_players, 0);
        assert_eq!(status.max_players, 0);
        assert_eq!(status.protocol_version, None);
    }

    #[test]
    fn test_rejects_documents_without_a_player_count() {
        let err = parse_status(r#"{"description": {"text": "hi"}}"#).unwrap_err();
        assert!(matches!(err, ProbeError::BadPayload(_)));

        let err = parse_status("not json at all").unwrap_err();
        assert!(matches!(err, ProbeError::BadPayload(_)));
    }

    #[tokio::test]
    async fn test_connection_cut_mid_exchange_reads_as_not_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // take the connection, then hang up without answering
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let prober = PingProber::new(&ProbeConfig {
            addr: "127.0.0.1".to_string(),
            port,
            protocol_version: 754,
            timeout_secs: 5,
        });
        let err = prober.query().await.unwrap_err();
        assert!(matches!(err, ProbeError::NotReady(_)), "got: {err:?}");
    }
}
