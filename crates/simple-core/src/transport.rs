//! Outbound request primitive toward the SIP transport layer

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Methods this core originates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Message,
    Notify,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Message => write!(f, "MESSAGE"),
            Method::Notify => write!(f, "NOTIFY"),
        }
    }
}

/// A one-shot request handed to the transport collaborator
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,

    /// Destination URI
    pub target: String,

    /// Header name/value pairs, sent in order
    pub headers: Vec<(String, String)>,

    pub body: Bytes,
}

impl OutboundRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// First value of the named header, if present
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport send primitive.
///
/// Implementations own retransmission and transaction matching; `send`
/// resolves exactly once with the final status code of the forwarded
/// request.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<u16>;
}
