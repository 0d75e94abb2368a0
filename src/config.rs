//! Requester-wide configuration (§4.F, §6.3).

use crate::stream_id::Role;

/// Default initial REQUEST_N value a STREAM/CHANNEL opens with, absent an
/// explicit override at the call site.
pub const DEFAULT_INITIAL_REQUEST_N: u32 = 16;

/// Bound on the outbound frame queue shared by every stream.
pub const DEFAULT_SENDER_CAPACITY: usize = crate::sender::DEFAULT_SENDER_CAPACITY;

/// Bound on each stream's inbound mailbox.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// Construction-time configuration for a [`crate::requester::Requester`].
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// This side's role, used to pick the odd/even stream ID space.
    pub role: Role,
    /// Initial REQUEST_N advertised by `request_stream`/`request_channel`
    /// when the caller doesn't specify one.
    pub initial_request_n: u32,
    /// Outbound frame queue depth.
    pub sender_capacity: usize,
    /// Per-stream inbound mailbox depth.
    pub inbound_capacity: usize,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            initial_request_n: DEFAULT_INITIAL_REQUEST_N,
            sender_capacity: DEFAULT_SENDER_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}
