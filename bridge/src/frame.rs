//! Terminal bridge wire frame (§6 "Terminal bridge frame").

use serde::{Deserialize, Serialize};

/// Frame kinds exchanged with the trading terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    Ping,
    AccountInfo,
    OpenOrder,
    CloseOrder,
    ModifyOrder,
    CloseAll,
    GetCandles,
}

impl FrameKind {
    fn as_wire_str(self) -> &'static str {
        match self {
            FrameKind::Ping => "PING",
            FrameKind::AccountInfo => "ACCOUNT_INFO",
            FrameKind::OpenOrder => "OPEN_ORDER",
            FrameKind::CloseOrder => "CLOSE_ORDER",
            FrameKind::ModifyOrder => "MODIFY_ORDER",
            FrameKind::CloseAll => "CLOSE_ALL",
            FrameKind::GetCandles => "GET_CANDLES",
        }
    }
}

/// Request frame, length-prefixed on the wire by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub correlation_id: String,
    pub timestamp: u64,
    pub kind: FrameKind,
    pub payload: serde_json::Value,
    pub signature: String,
}

impl Frame {
    /// Builds and signs a frame. `shared_secret` is the HMAC key established
    /// at terminal pairing time.
    pub fn sign(
        correlation_id: String,
        timestamp: u64,
        kind: FrameKind,
        payload: serde_json::Value,
        shared_secret: &[u8],
    ) -> Self {
        let message = canonical_message(&correlation_id, timestamp, kind, &payload);
        let signature = agent_crypto::sign(&message, shared_secret);
        Self {
            correlation_id,
            timestamp,
            kind,
            payload,
            signature,
        }
    }

    /// Verifies `signature` against the frame's other fields.
    pub fn verify(&self, shared_secret: &[u8]) -> bool {
        let message = canonical_message(&self.correlation_id, self.timestamp, self.kind, &self.payload);
        agent_crypto::verify(&message, shared_secret, &self.signature)
    }
}

fn canonical_message(
    correlation_id: &str,
    timestamp: u64,
    kind: FrameKind,
    payload: &serde_json::Value,
) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(correlation_id.as_bytes());
    message.extend_from_slice(timestamp.to_string().as_bytes());
    message.extend_from_slice(kind.as_wire_str().as_bytes());
    message.extend_from_slice(payload.to_string().as_bytes());
    message
}

/// Reply frame; `correlationId` mirrors the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReply {
    pub correlation_id: String,
    pub ok: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_frame_verifies_with_same_secret() {
        let frame = Frame::sign(
            "corr-1".into(),
            1_700_000_000_000,
            FrameKind::Ping,
            serde_json::json!({}),
            b"shared-secret",
        );
        assert!(frame.verify(b"shared-secret"));
        assert!(!frame.verify(b"wrong-secret"));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut frame = Frame::sign(
            "corr-1".into(),
            1_700_000_000_000,
            FrameKind::Ping,
            serde_json::json!({"a": 1}),
            b"shared-secret",
        );
        frame.payload = serde_json::json!({"a": 2});
        assert!(!frame.verify(b"shared-secret"));
    }
}
