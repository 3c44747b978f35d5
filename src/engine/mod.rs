//! Request execution: the per-attempt stream state machine, body
//! destinations, and the coordinator that owns a logical request.

mod coordinator;
mod output;
mod response;
mod stream;

pub use coordinator::{RequestDelegate, RequestEngine, RequestHandle};
pub use output::ResponseBody;
pub use response::Response;
pub use stream::StreamState;
