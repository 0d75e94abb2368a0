//! The Requester facade (§4.F): the five interaction operations callers use.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RequesterConfig;
use crate::error::{RequesterError, Result};
use crate::frame::Frame;
use crate::payload::{Payload, StreamResult};
use crate::registry::Registry;
use crate::sender::FrameSender;
use crate::stream::{ResultSource, StreamHandle, StreamKind};
use crate::stream_id::StreamId;

/// The caller-supplied upstream of a CHANNEL interaction: a pull-based
/// source of [`StreamResult`] the outbound pump drains as credit allows.
pub struct ChannelSource {
    rx: mpsc::Receiver<StreamResult>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<StreamResult>) -> Self {
        Self { rx }
    }

    /// Non-blocking peek, used once at REQUEST_CHANNEL construction time to
    /// decide whether a first payload can be embedded in the initial frame.
    fn try_next(&mut self) -> Option<StreamResult> {
        self.rx.try_recv().ok()
    }

    async fn next(&mut self) -> Option<StreamResult> {
        self.rx.recv().await
    }
}

/// Client-side RSocket Requester: allocates StreamIDs, drives the five
/// interaction models, and wires caller-context cancellation into the wire
/// protocol.
pub struct Requester {
    registry: Arc<Registry>,
    sender: FrameSender,
    config: RequesterConfig,
    metadata_push_tx: mpsc::Sender<Bytes>,
}

impl Requester {
    /// Build a fresh Requester. Returns the facade plus the two channels an
    /// embedding transport must drive: the outbound frame queue (feed to the
    /// wire writer) and the inbound METADATA_PUSH sink (frames with
    /// StreamID=0 routed here by [`crate::dispatcher::dispatch_frame`]).
    pub fn new(config: RequesterConfig) -> (Self, mpsc::Receiver<Frame>, mpsc::Receiver<Bytes>) {
        let (sender, outbound_rx) = FrameSender::new(config.sender_capacity);
        let (metadata_push_tx, metadata_push_rx) = mpsc::channel(config.inbound_capacity);
        let registry = Arc::new(Registry::new(config.role));
        (
            Self {
                registry,
                sender,
                config,
                metadata_push_tx,
            },
            outbound_rx,
            metadata_push_rx,
        )
    }

    /// Shared handle to the stream registry, for wiring up the inbound
    /// dispatcher loop.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Sink for inbound METADATA_PUSH frames, for wiring up the dispatcher.
    pub fn metadata_push_sender(&self) -> mpsc::Sender<Bytes> {
        self.metadata_push_tx.clone()
    }

    async fn enqueue_cancelable(&self, frame: Frame, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RequesterError::Canceled),
            result = self.sender.enqueue(frame) => result,
        }
    }

    /// Fire a payload with no response expected. No stream state survives
    /// the call either way.
    pub async fn fire_and_forget(&self, cancel: &CancellationToken, payload: Payload) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RequesterError::Canceled);
        }
        let stream_id = self.registry.allocate_id()?;
        let (metadata, data) = payload.into_parts();
        self.enqueue_cancelable(
            Frame::RequestFnf {
                stream_id,
                metadata,
                data,
            },
            cancel,
        )
        .await?;
        debug!(stream_id, "fire-and-forget sent");
        Ok(())
    }

    /// Push connection-wide metadata; never allocates a stream.
    pub async fn metadata_push(&self, cancel: &CancellationToken, metadata: Bytes) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RequesterError::Canceled);
        }
        self.enqueue_cancelable(Frame::MetadataPush { metadata }, cancel)
            .await
    }

    /// Send one request, await exactly one terminal result.
    pub async fn request_response(
        &self,
        cancel: &CancellationToken,
        payload: Payload,
    ) -> Result<Payload> {
        if cancel.is_cancelled() {
            return Err(RequesterError::Canceled);
        }

        let (inbound_tx, mut inbound_rx) = mpsc::channel(1);
        let handle = self.registry.register_new(|id| {
            Arc::new(StreamHandle::new(
                id,
                StreamKind::Response,
                inbound_tx,
                self.sender.clone(),
                0,
            ))
        })?;
        let stream_id = handle.id();

        let outcome = self
            .drive_request_response(&handle, stream_id, payload, cancel, &mut inbound_rx)
            .await;
        self.registry.remove(stream_id);
        outcome
    }

    async fn drive_request_response(
        &self,
        handle: &Arc<StreamHandle>,
        stream_id: StreamId,
        payload: Payload,
        cancel: &CancellationToken,
        inbound_rx: &mut mpsc::Receiver<StreamResult>,
    ) -> Result<Payload> {
        let (metadata, data) = payload.into_parts();
        self.enqueue_cancelable(
            Frame::RequestResponse {
                stream_id,
                metadata,
                data,
            },
            cancel,
        )
        .await?;
        handle.mark_open();

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                handle.mark_locally_canceled();
                let _ = self.sender.enqueue(Frame::Cancel { stream_id }).await;
                Err(RequesterError::Canceled)
            }
            item = inbound_rx.recv() => match item {
                Some(StreamResult::Payload(p)) => Ok(p),
                Some(StreamResult::Error(e)) => Err(RequesterError::Remote(e)),
                None => Err(RequesterError::ConnectionClosed),
            }
        }
    }

    /// Open a STREAM interaction; returns a source of results the caller
    /// drains with [`ResultSource::next`].
    pub async fn request_stream(
        &self,
        cancel: CancellationToken,
        payload: Payload,
    ) -> Result<ResultSource> {
        if cancel.is_cancelled() {
            return Err(RequesterError::Canceled);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let initial_request_n = self.config.initial_request_n;
        let handle = self.registry.register_new(|id| {
            Arc::new(StreamHandle::new(
                id,
                StreamKind::Stream,
                inbound_tx,
                self.sender.clone(),
                initial_request_n,
            ))
        })?;
        let stream_id = handle.id();

        let (metadata, data) = payload.into_parts();
        let frame = Frame::RequestStream {
            stream_id,
            initial_request_n,
            metadata,
            data,
        };
        if let Err(e) = self.enqueue_cancelable(frame, &cancel).await {
            self.registry.remove(stream_id);
            return Err(e);
        }
        handle.mark_open();
        debug!(stream_id, "request-stream opened");

        Ok(ResultSource::new(
            handle,
            self.registry(),
            inbound_rx,
            self.sender.clone(),
            cancel,
        ))
    }

    /// Open a CHANNEL interaction: `outbound` is drained credit-gated by a
    /// spawned pump task; returns the inbound source.
    pub async fn request_channel(
        &self,
        cancel: CancellationToken,
        mut outbound: ChannelSource,
    ) -> Result<ResultSource> {
        if cancel.is_cancelled() {
            return Err(RequesterError::Canceled);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
        let initial_request_n = self.config.initial_request_n;
        let handle = self.registry.register_new(|id| {
            Arc::new(StreamHandle::new(
                id,
                StreamKind::Channel,
                inbound_tx,
                self.sender.clone(),
                initial_request_n,
            ))
        })?;
        let stream_id = handle.id();

        // A non-blocking peek decides whether the first payload travels
        // embedded in REQUEST_CHANNEL itself (§4.F step 2); this first item
        // does not consume creditOut, which starts at 0 until a RequestN
        // arrives.
        let first = outbound.try_next();
        let frame = match first {
            Some(StreamResult::Payload(p)) => {
                let (metadata, data) = p.into_parts();
                Frame::RequestChannel {
                    stream_id,
                    initial_request_n,
                    complete: false,
                    metadata,
                    data,
                }
            }
            Some(StreamResult::Error(_)) | None => Frame::RequestChannel {
                stream_id,
                initial_request_n,
                complete: false,
                metadata: None,
                data: Bytes::new(),
            },
        };

        if let Err(e) = self.enqueue_cancelable(frame, &cancel).await {
            self.registry.remove(stream_id);
            return Err(e);
        }
        handle.mark_open();

        if let Some(StreamResult::Error(remote)) = first {
            let _ = self
                .sender
                .enqueue(Frame::Error {
                    stream_id,
                    code: remote.code as u32,
                    message: remote.message,
                })
                .await;
            if handle.mark_outbound_done() {
                self.registry.remove(stream_id);
            }
        } else {
            tokio::spawn(run_channel_pump(
                Arc::clone(&handle),
                self.registry(),
                self.sender.clone(),
                outbound,
            ));
        }

        debug!(stream_id, "request-channel opened");
        Ok(ResultSource::new(
            handle,
            self.registry(),
            inbound_rx,
            self.sender.clone(),
            cancel,
        ))
    }
}

/// The per-CHANNEL outbound pump (§4.D CHANNEL outbound-frame rules): reads
/// from the caller's source, gated by `creditOut`, until the source ends,
/// errors, or local cancellation fires.
async fn run_channel_pump(
    handle: Arc<StreamHandle>,
    registry: Arc<Registry>,
    sender: FrameSender,
    mut outbound: ChannelSource,
) {
    let stream_id = handle.id();
    loop {
        let pump_cancel = handle.pump_cancellation();
        let next = tokio::select! {
            biased;
            () = pump_cancel.cancelled() => break,
            next = outbound.next() => next,
        };

        match next {
            Some(StreamResult::Payload(p)) => {
                // Only a data-bearing PAYLOAD(next) is credit-gated; the
                // terminal COMPLETE/ERROR below are unconditional.
                tokio::select! {
                    biased;
                    () = pump_cancel.cancelled() => break,
                    () = handle.acquire_outbound_credit() => {}
                }
                let (metadata, data) = p.into_parts();
                let frame = Frame::Payload {
                    stream_id,
                    next: true,
                    complete: false,
                    metadata,
                    data,
                };
                if sender.enqueue(frame).await.is_err() {
                    break;
                }
            }
            Some(StreamResult::Error(e)) => {
                let frame = Frame::Error {
                    stream_id,
                    code: e.code as u32,
                    message: e.message,
                };
                let _ = sender.enqueue(frame).await;
                if handle.mark_outbound_done() {
                    registry.remove(stream_id);
                }
                break;
            }
            None => {
                let frame = Frame::Payload {
                    stream_id,
                    next: false,
                    complete: true,
                    metadata: None,
                    data: Bytes::new(),
                };
                let _ = sender.enqueue(frame).await;
                if handle.mark_outbound_done() {
                    registry.remove(stream_id);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::stream_id::Role;
    use std::time::Duration;

    fn test_config() -> RequesterConfig {
        RequesterConfig {
            role: Role::Client,
            initial_request_n: 16,
            sender_capacity: 16,
            inbound_capacity: 16,
        }
    }

    #[tokio::test]
    async fn fire_and_forget_sends_frame_and_keeps_no_state() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        requester
            .fire_and_forget(&CancellationToken::new(), Payload::text("hello").with_metadata("world"))
            .await
            .unwrap();

        match outbound.recv().await.unwrap() {
            Frame::RequestFnf {
                stream_id,
                metadata,
                data,
            } => {
                assert_eq!(stream_id, 1);
                assert_eq!(metadata.unwrap().as_ref(), b"world");
                assert_eq!(data.as_ref(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(requester.registry().is_empty());
    }

    #[tokio::test]
    async fn metadata_push_uses_stream_zero() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        requester
            .metadata_push(&CancellationToken::new(), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        match outbound.recv().await.unwrap() {
            Frame::MetadataPush { metadata } => assert_eq!(metadata.as_ref(), b"hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_response_returns_payload_on_complete() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        let cancel = CancellationToken::new();

        let call = tokio::spawn({
            let requester_registry = requester.registry();
            let sender = requester.sender.clone();
            async move {
                // Wait for the request to land, then answer it.
                let frame = outbound.recv().await.unwrap();
                let stream_id = frame.stream_id();
                let handle = requester_registry.lookup(stream_id).unwrap();
                let _ = sender;
                handle
                    .on_frame(Frame::Payload {
                        stream_id,
                        next: true,
                        complete: true,
                        metadata: None,
                        data: Bytes::from_static(b"hello world"),
                    })
                    .await
                    .unwrap();
            }
        });

        let result = requester
            .request_response(&cancel, Payload::text("hello").with_metadata("world"))
            .await
            .unwrap();
        assert_eq!(result.data().as_ref(), b"hello world");
        call.await.unwrap();
        assert!(requester.registry().is_empty());
    }

    #[tokio::test]
    async fn request_response_surfaces_remote_error() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        let cancel = CancellationToken::new();

        let registry = requester.registry();
        let responder = tokio::spawn(async move {
            let frame = outbound.recv().await.unwrap();
            let stream_id = frame.stream_id();
            let handle = registry.lookup(stream_id).unwrap();
            handle
                .on_frame(Frame::Error {
                    stream_id,
                    code: ErrorCode::ApplicationError as u32,
                    message: "for test".into(),
                })
                .await
                .unwrap();
        });

        let err = requester
            .request_response(&cancel, Payload::text("hello"))
            .await
            .unwrap_err();
        match err {
            RequesterError::Remote(e) => {
                assert_eq!(e.code, ErrorCode::ApplicationError);
                assert_eq!(e.message, "for test");
            }
            other => panic!("unexpected {other:?}"),
        }
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn request_stream_delivers_payloads_in_order_then_closes() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        let cancel = CancellationToken::new();

        let mut source = requester
            .request_stream(cancel, Payload::text("hello").with_metadata("world"))
            .await
            .unwrap();

        match outbound.recv().await.unwrap() {
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                metadata,
                data,
            } => {
                assert_eq!(stream_id, 1);
                assert_eq!(initial_request_n, 16);
                assert_eq!(metadata.unwrap().as_ref(), b"world");
                assert_eq!(data.as_ref(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }

        let (mp_tx, _mp_rx) = mpsc::channel(4);
        crate::dispatcher::dispatch_frame(
            &requester.registry(),
            &mp_tx,
            Frame::Payload {
                stream_id: 1,
                next: true,
                complete: false,
                metadata: None,
                data: Bytes::from_static(b"foo"),
            },
        )
        .await;
        crate::dispatcher::dispatch_frame(
            &requester.registry(),
            &mp_tx,
            Frame::Payload {
                stream_id: 1,
                next: true,
                complete: true,
                metadata: None,
                data: Bytes::from_static(b"bar"),
            },
        )
        .await;

        assert_eq!(
            source.next().await.unwrap(),
            StreamResult::payload(Payload::bytes(Bytes::from_static(b"foo")))
        );
        assert_eq!(
            source.next().await.unwrap(),
            StreamResult::payload(Payload::bytes(Bytes::from_static(b"bar")))
        );
        assert!(source.next().await.is_none());
        assert!(requester.registry().is_empty());
    }

    #[tokio::test]
    async fn request_stream_cancellation_emits_cancel_and_closes() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        let cancel = CancellationToken::new();

        let mut source = requester
            .request_stream(cancel.clone(), Payload::text("hello"))
            .await
            .unwrap();
        outbound.recv().await.unwrap(); // initial REQUEST_STREAM

        cancel.cancel();
        match source.next().await.unwrap() {
            StreamResult::Error(e) => assert_eq!(e.code, ErrorCode::Canceled),
            other => panic!("unexpected {other:?}"),
        }
        match outbound.recv().await.unwrap() {
            Frame::Cancel { stream_id } => assert_eq!(stream_id, 1),
            other => panic!("expected CANCEL, got {other:?}"),
        }
        assert!(requester.registry().is_empty());
    }

    #[tokio::test]
    async fn request_channel_embeds_first_payload_and_pumps_rest_on_credit() {
        let (requester, mut outbound, _mp) = Requester::new(test_config());
        let cancel = CancellationToken::new();

        let (out_tx, out_rx) = mpsc::channel(4);
        out_tx
            .send(StreamResult::payload(Payload::text("hello")))
            .await
            .unwrap();
        out_tx
            .send(StreamResult::payload(Payload::text("world")))
            .await
            .unwrap();
        drop(out_tx);

        let mut source = requester
            .request_channel(cancel, ChannelSource::new(out_rx))
            .await
            .unwrap();

        match outbound.recv().await.unwrap() {
            Frame::RequestChannel {
                stream_id,
                initial_request_n,
                complete,
                data,
                ..
            } => {
                assert_eq!(stream_id, 1);
                assert_eq!(initial_request_n, 16);
                assert!(!complete);
                assert_eq!(data.as_ref(), b"hello");
            }
            other => panic!("unexpected {other:?}"),
        }

        let handle = requester.registry().lookup(1).unwrap();
        handle
            .on_frame(Frame::RequestN { stream_id: 1, n: 16 })
            .await
            .unwrap();

        match tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap()
        {
            Frame::Payload {
                next,
                complete,
                data,
                ..
            } => {
                assert!(next);
                assert!(!complete);
                assert_eq!(data.as_ref(), b"world");
            }
            other => panic!("unexpected {other:?}"),
        }

        match tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .unwrap()
            .unwrap()
        {
            Frame::Payload { next, complete, .. } => {
                assert!(!next);
                assert!(complete);
            }
            other => panic!("unexpected {other:?}"),
        }

        let (mp_tx, _mp_rx) = mpsc::channel(4);
        crate::dispatcher::dispatch_frame(
            &requester.registry(),
            &mp_tx,
            Frame::Payload {
                stream_id: 1,
                next: true,
                complete: false,
                metadata: None,
                data: Bytes::from_static(b"foo"),
            },
        )
        .await;
        crate::dispatcher::dispatch_frame(
            &requester.registry(),
            &mp_tx,
            Frame::Payload {
                stream_id: 1,
                next: true,
                complete: true,
                metadata: None,
                data: Bytes::from_static(b"bar"),
            },
        )
        .await;

        assert_eq!(
            source.next().await.unwrap(),
            StreamResult::payload(Payload::bytes(Bytes::from_static(b"foo")))
        );
        assert_eq!(
            source.next().await.unwrap(),
            StreamResult::payload(Payload::bytes(Bytes::from_static(b"bar")))
        );
        assert!(source.next().await.is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(requester.registry().is_empty());
    }
}
