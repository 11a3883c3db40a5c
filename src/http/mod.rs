pub mod parse;
pub(crate) mod request;
pub(crate) mod response;

pub use request::{Body, Method, Request, Version};
pub use response::Response;
