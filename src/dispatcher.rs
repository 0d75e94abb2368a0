//! Inbound frame dispatch: stream-0 connection frames and per-stream routing
//! (§4.D, §4.G).
//!
//! One task owns the inbound half of the transport and drives this loop;
//! it never touches the outbound queue itself (that is [`crate::sender::FrameSender`]'s
//! job), so an application-level deadlock between inbound processing and
//! outbound backpressure cannot form through this module.

use tracing::{debug, warn};

use crate::error::{ErrorCode, RemoteError};
use crate::frame::Frame;
use crate::payload::StreamResult;
use crate::registry::Registry;
use crate::stream::FrameOutcome;

/// Route one inbound frame to the right place.
///
/// Stream ID 0 carries connection-wide frames (METADATA_PUSH, SETUP,
/// KEEPALIVE, and a connection-fatal ERROR); everything else is routed to
/// the matching registered stream. A frame for an unknown or already-removed
/// stream is logged and dropped rather than treated as fatal — the peer may
/// simply be late tearing down a stream we have already forgotten.
pub async fn dispatch_frame(
    registry: &Registry,
    metadata_push_tx: &tokio::sync::mpsc::Sender<bytes::Bytes>,
    frame: Frame,
) {
    if frame.stream_id() == 0 {
        dispatch_connection_frame(registry, metadata_push_tx, frame).await;
        return;
    }

    let stream_id = frame.stream_id();
    let Some(handle) = registry.lookup(stream_id) else {
        debug!(stream_id, frame_type = ?frame.frame_type(), "frame for unknown or already-closed stream");
        return;
    };

    match handle.on_frame(frame).await {
        Ok(FrameOutcome::Terminal) => {
            registry.remove(stream_id);
        }
        Ok(FrameOutcome::Continue) => {}
        Err(e) => {
            warn!(stream_id, error = %e, "error processing inbound frame");
            registry.remove(stream_id);
        }
    }
}

async fn dispatch_connection_frame(
    registry: &Registry,
    metadata_push_tx: &tokio::sync::mpsc::Sender<bytes::Bytes>,
    frame: Frame,
) {
    match frame {
        Frame::MetadataPush { metadata } => {
            let _ = metadata_push_tx.send(metadata).await;
        }
        Frame::Setup { .. } | Frame::Keepalive { .. } => {
            // Recognized but inert: no negotiation or keepalive behavior is
            // implemented by this core.
        }
        Frame::Error { code, message, .. } => {
            let error_code = ErrorCode::from_u32(code).unwrap_or(ErrorCode::ConnectionError);
            warn!(code = %error_code, %message, "connection-wide error; tearing down all streams");
            let remote = RemoteError::new(error_code, message);
            teardown_all(registry, remote).await;
        }
        other => {
            debug!(frame_type = ?other.frame_type(), "unexpected connection-wide frame");
        }
    }
}

async fn teardown_all(registry: &Registry, remote: RemoteError) {
    for handle in registry.all() {
        let synthetic = Frame::Error {
            stream_id: handle.id(),
            code: remote.code as u32,
            message: remote.message.clone(),
        };
        let _ = handle.on_frame(synthetic).await;
        registry.remove(handle.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::sender::FrameSender;
    use crate::stream::StreamKind;
    use crate::stream_id::Role;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn metadata_push_is_forwarded() {
        let registry = Registry::new(Role::Client);
        let (mp_tx, mut mp_rx) = mpsc::channel(4);
        dispatch_frame(
            &registry,
            &mp_tx,
            Frame::MetadataPush {
                metadata: Bytes::from_static(b"ping"),
            },
        )
        .await;
        assert_eq!(mp_rx.recv().await.unwrap(), Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn payload_for_unknown_stream_is_dropped_quietly() {
        let registry = Registry::new(Role::Client);
        let (mp_tx, _mp_rx) = mpsc::channel(4);
        dispatch_frame(
            &registry,
            &mp_tx,
            Frame::Payload {
                stream_id: 99,
                next: true,
                complete: true,
                metadata: None,
                data: Bytes::new(),
            },
        )
        .await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn terminal_frame_removes_stream_from_registry() {
        let registry = Registry::new(Role::Client);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let (sender, _frame_rx) = FrameSender::new(4);
        let handle = registry
            .register_new(|id| {
                Arc::new(crate::stream::StreamHandle::new(
                    id,
                    StreamKind::Response,
                    inbound_tx,
                    sender,
                    0,
                ))
            })
            .unwrap();
        handle.mark_open();
        let id = handle.id();

        let (mp_tx, _mp_rx) = mpsc::channel(4);
        dispatch_frame(
            &registry,
            &mp_tx,
            Frame::Payload {
                stream_id: id,
                next: true,
                complete: true,
                metadata: None,
                data: Bytes::from_static(b"done"),
            },
        )
        .await;

        assert!(registry.lookup(id).is_none());
        match inbound_rx.recv().await.unwrap() {
            StreamResult::Payload(p) => assert_eq!(p, Payload::bytes(Bytes::from_static(b"done"))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_error_tears_down_all_open_streams() {
        let registry = Registry::new(Role::Client);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(4);
        let (sender, _frame_rx) = FrameSender::new(4);
        let handle = registry
            .register_new(|id| {
                Arc::new(crate::stream::StreamHandle::new(
                    id,
                    StreamKind::Stream,
                    inbound_tx,
                    sender,
                    16,
                ))
            })
            .unwrap();
        handle.mark_open();

        let (mp_tx, _mp_rx) = mpsc::channel(4);
        dispatch_frame(
            &registry,
            &mp_tx,
            Frame::Error {
                stream_id: 0,
                code: ErrorCode::ConnectionError as u32,
                message: "bye".into(),
            },
        )
        .await;

        assert!(registry.is_empty());
        match inbound_rx.recv().await.unwrap() {
            StreamResult::Error(e) => assert_eq!(e.code, ErrorCode::ConnectionError),
            other => panic!("unexpected {other:?}"),
        }
    }
}
