use crate::config::RunnerConfig;
use crate::error::RmeterError;
use crate::model::AttackResult;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// What a controller can ask a node to do. Framed length-delimited and
/// bincode-encoded over a plain TCP stream - the original used gRPC
/// streaming with gob payloads; this keeps the same shape (one control
/// message, then a stream of result batches) without pulling in a
/// protobuf/tonic schema that isn't grounded anywhere in the spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeRequest {
    Status,
    Run(Box<RunnerConfig>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeResponse {
    Status { busy: bool },
    /// One tick's worth of results, forwarded as soon as the node's local
    /// aggregator closes that tick out.
    Batch(Vec<AttackResult>),
    StreamEnd,
    Error(String),
}

pub type WireTransport = Framed<TcpStream, LengthDelimitedCodec>;

pub fn transport(stream: TcpStream) -> WireTransport {
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RmeterError> {
    bincode::serialize(value).map_err(|e| RmeterError::Cluster(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, RmeterError> {
    bincode::deserialize(bytes).map_err(|e| RmeterError::Cluster(e.to_string()))
}
