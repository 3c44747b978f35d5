//! Request description and wire encoding.
//!
//! A [`RequestDescriptor`] says what to send; a [`RequestBuilder`] turns it
//! into a [`WireRequest`] with exact body framing and length.

mod builder;
mod content_type;
mod descriptor;

pub use builder::{BodySegment, RequestBuilder, WireBody, WireRequest};
pub use content_type::{DEFAULT_CONTENT_TYPE, content_type_for_path};
pub use descriptor::RequestDescriptor;
