#![allow(unreachable_pub)]

mod error;
mod request;
mod response;

pub use error::{BoxedCause, ErrorKind};
pub use request::RequestOptions;
pub use response::{Body, RawResponse};

/// The corral `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
