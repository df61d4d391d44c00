//! Binary request/response protocol between `RemoteStore` and `SyncServer`.
//!
//! Every WebSocket binary message carries exactly one bincode-encoded frame:
//! ```text
//! client ──► server   ClientFrame { id, op }
//! server ──► client   ServerFrame::Response { request: id, result }
//!                     ServerFrame::Snapshot { subscription, result }
//! ```
//!
//! Responses are correlated by request id. Snapshot frames are pushed for
//! every change to a live query and tagged with the client-chosen
//! subscription id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use labsync_core::{BackendError, DocId, Document, Fields, Query, SnapshotResult, UserId};

/// An operation requested by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    SignIn {
        /// Identifier to resume instead of issuing a new one.
        resume: Option<UserId>,
    },
    SignOut,
    Create {
        collection: String,
        fields: Fields,
    },
    Update {
        collection: String,
        id: DocId,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: DocId,
    },
    Get {
        collection: String,
        id: DocId,
    },
    Query {
        collection: String,
        query: Query,
    },
    Subscribe {
        subscription: u64,
        collection: String,
        query: Query,
    },
    Unsubscribe {
        subscription: u64,
    },
    Ping,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SignIn { .. } => "sign-in",
            Operation::SignOut => "sign-out",
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
            Operation::Get { .. } => "get",
            Operation::Query { .. } => "query",
            Operation::Subscribe { .. } => "subscribe",
            Operation::Unsubscribe { .. } => "unsubscribe",
            Operation::Ping => "ping",
        }
    }

    /// Whether the operation mutates stored documents.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Create { .. } | Operation::Update { .. } | Operation::Delete { .. }
        )
    }
}

/// Successful result of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    SignedIn(UserId),
    Document(Document),
    MaybeDocument(Option<Document>),
    Documents(Vec<Document>),
    Done,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    Response {
        request: u64,
        result: Result<Reply, BackendError>,
    },
    Snapshot {
        subscription: u64,
        result: SnapshotResult,
    },
}

impl ClientFrame {
    pub fn new(id: u64, op: Operation) -> Self {
        Self { id, op }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerFrame {
    pub fn response(request: u64, result: Result<Reply, BackendError>) -> Self {
        ServerFrame::Response { request, result }
    }

    pub fn snapshot(subscription: u64, result: SnapshotResult) -> Self {
        ServerFrame::Snapshot {
            subscription,
            result,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(frame)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

impl From<ProtocolError> for BackendError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ConnectionClosed | ProtocolError::ConnectFailed(_) => {
                BackendError::network(err.to_string())
            }
            other => BackendError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labsync_core::{Direction, ErrorCode, FieldValue, Timestamp};

    #[test]
    fn test_create_frame_carries_sentinel() {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::string("Lab A"));
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        let frame = ClientFrame::new(
            7,
            Operation::Create {
                collection: "laboratorios".into(),
                fields: fields.clone(),
            },
        );

        let decoded = ClientFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded.id, 7);
        match decoded.op {
            Operation::Create { collection, fields: got } => {
                assert_eq!(collection, "laboratorios");
                assert_eq!(got["createdAt"], FieldValue::ServerTimestamp);
                assert_eq!(got, fields);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_frame_with_query_results() {
        let doc = Document {
            id: DocId::from("a"),
            fields: Fields::new(),
            create_time: Timestamp(3),
            update_time: Timestamp(4),
        };
        let frame = ServerFrame::snapshot(2, Ok(vec![doc.clone()]));
        assert_eq!(ServerFrame::decode(&frame.encode().unwrap()).unwrap(), frame);

        let query = Query::new()
            .where_eq("status", FieldValue::string("active"))
            .order_by("createdAt", Direction::Descending);
        let subscribe = ClientFrame::new(
            1,
            Operation::Subscribe {
                subscription: 2,
                collection: "laboratorios".into(),
                query,
            },
        );
        assert_eq!(ClientFrame::decode(&subscribe.encode().unwrap()).unwrap(), subscribe);
    }

    #[test]
    fn test_error_response_keeps_code() {
        let frame = ServerFrame::response(5, Err(BackendError::new(ErrorCode::parse("resource-exhausted"), "Quota")));
        match ServerFrame::decode(&frame.encode().unwrap()).unwrap() {
            ServerFrame::Response { request, result } => {
                assert_eq!(request, 5);
                let err = result.unwrap_err();
                assert_eq!(err.code.as_str(), "resource-exhausted");
                assert_eq!(err.message, "Quota");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(
            ServerFrame::decode(&[0xFF, 0xFE, 0xFD]),
            Err(ProtocolError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_operation_classification() {
        assert!(Operation::Delete {
            collection: "c".into(),
            id: DocId::from("x")
        }
        .is_write());
        assert!(!Operation::Ping.is_write());
        assert!(!Operation::SignOut.is_write());
        assert_eq!(Operation::Ping.name(), "ping");
    }

    #[test]
    fn test_closed_connection_maps_to_network_error() {
        let err: BackendError = ProtocolError::ConnectionClosed.into();
        assert_eq!(err.code, ErrorCode::NetworkRequestFailed);
    }
}
