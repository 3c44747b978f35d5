//! Defaults for the HTTP transport.

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-exchange timeout (5 minutes for large transfers).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Request body chunk size; each chunk produces one upload progress event.
pub const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Capacity of the per-request event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;
