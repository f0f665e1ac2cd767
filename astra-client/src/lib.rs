//! HTTP plumbing shared by the backend client: a transport trait, its
//! reqwest implementation, and the request/response/error types.

mod error;
mod request;
mod transport;

pub use crate::error::TransportError;
pub use crate::request::Request;
pub use crate::request::Response;
pub use crate::transport::HttpTransport;
pub use crate::transport::ReqwestTransport;
