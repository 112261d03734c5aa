use std::fmt::Display;

use async_trait::async_trait;

use crate::data_types::RoundTripMillis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoStatus {
    /// The address replied within the timeout
    Success,

    /// The request was sent but no reply arrived
    Failed,
}

/// The outcome of one echo request. A failed request still carries a round trip time,
/// which is whatever the transport reports for it (normally zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub status: EchoStatus,
    pub round_trip_time: RoundTripMillis,
}

#[rustfmt::skip]
impl EchoReply {
    pub fn success(round_trip_time: RoundTripMillis) -> Self { Self { status: EchoStatus::Success, round_trip_time } }
    pub fn failed(round_trip_time: RoundTripMillis) -> Self { Self { status: EchoStatus::Failed, round_trip_time } }
    pub fn is_success(self: &Self) -> bool { self.status == EchoStatus::Success }
}

/// The transport could not send the request at all, as opposed to sending it and
/// getting no reply.
#[derive(Debug, Clone, PartialEq)]
pub enum EchoError {
    InvalidAddress { address: String },
    Transport { msg: String },
}

impl Display for EchoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoError::InvalidAddress { address } => write!(f, "invalid address '{address}'"),
            EchoError::Transport { msg } => write!(f, "transport failure: {msg}"),
        }
    }
}

impl std::error::Error for EchoError {}

pub type EchoResult = Result<EchoReply, EchoError>;

#[async_trait]
pub trait EchoTransport: Send + Sync {
    async fn echo(self: &Self, address: &str) -> EchoResult;
}
