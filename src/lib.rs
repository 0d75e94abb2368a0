//! Client-side RSocket Requester core.
//!
//! This crate implements the protocol state machine for the four
//! Requester-initiated interaction models — fire-and-forget, request/
//! response, request/stream, request/channel — plus metadata push,
//! multiplexed over a single bidirectional frame transport. Frame wire I/O,
//! connection setup/keepalive/resumption, and the server-side Responder are
//! out of scope: this crate consumes and produces typed [`frame::Frame`]
//! values and leaves the transport to the embedding application.
//!
//! Wiring one up:
//!
//! ```no_run
//! use rsocket_requester::{config::RequesterConfig, requester::Requester, dispatcher};
//!
//! # async fn run() {
//! let (requester, mut outbound_frames, mut metadata_pushes) =
//!     Requester::new(RequesterConfig::default());
//! let registry = requester.registry();
//! let metadata_push_tx = requester.metadata_push_sender();
//!
//! // Application-owned: drain `outbound_frames` to the wire, decode inbound
//! // frames and feed them to `dispatcher::dispatch_frame`.
//! tokio::spawn(async move {
//!     while let Some(frame) = outbound_frames.recv().await {
//!         let _ = frame.encode();
//!     }
//! });
//! # let _ = (registry, metadata_push_tx, metadata_pushes);
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod payload;
pub mod registry;
pub mod requester;
pub mod sender;
pub mod stream;
pub mod stream_id;

pub use config::RequesterConfig;
pub use error::{ErrorCode, RemoteError, RequesterError, Result};
pub use frame::{Frame, FrameType};
pub use payload::{Payload, StreamResult};
pub use requester::{ChannelSource, Requester};
pub use stream::{ResultSource, StreamKind, StreamState};
pub use stream_id::{Role, StreamId};
