//! Network layer: request model, transport trait and the reqwest client.

mod client;
mod request;
mod transport;

pub use client::ReqwestTransport;
pub use request::{merge_headers, Attachment, Headers, HttpMethod, HttpRequest, Payload};
pub use transport::{HttpResponse, Transport, TransportError};
