//! Transport manager: getting encoded samples to consumers.
//!
//! In server role consumers connect to us ([`server`]); in client role we
//! hold one outbound connection to a cloud relay ([`client`]). Either way
//! the relay loop only sees a [`SampleSink`].

pub mod client;
pub mod server;

use std::sync::Arc;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};

use skyrelay_common::{Format, TelemetrySample};

/// One encoded sample, cheap to clone across channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Arc<str>),
    Binary(Arc<[u8]>),
}

impl Frame {
    /// Convert to a WebSocket message.
    pub fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text.to_string()),
            Frame::Binary(bytes) => Message::Binary(bytes.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The frame as text, if it is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }
}

/// Encode a sample into a frame of the given format.
pub fn encode_frame(
    sample: &TelemetrySample,
    format: Format,
) -> skyrelay_common::Result<Frame> {
    let bytes = skyrelay_common::encode(sample, format)?;
    Ok(match format {
        Format::Json => Frame::Text(String::from_utf8_lossy(&bytes).into()),
        Format::Cbor => Frame::Binary(bytes.into()),
    })
}

/// Errors from transport operations. None of these are fatal to the relay.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("send timed out after {0:?}")]
    SendTimeout(std::time::Duration),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("connection closed")]
    Closed,
}

/// Destination for encoded samples.
///
/// `deliver` is synchronous and must not block: it is called from the
/// relay loop once per tick.
pub trait SampleSink: Send + Sync {
    fn deliver(&self, frame: Frame);
}
