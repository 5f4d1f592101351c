//! `corral` is a library for dispatching HTTP requests with two guarantees
//! on top of the underlying client: identical concurrent requests collapse
//! into a single network call, and no host sees more than a fixed number of
//! requests at a time. Excess requests wait their turn in arrival order.
//!
//! "Hello world" example:
//! ```no_run
//! use corral_lib::{DispatcherBuilder, RequestOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let dispatcher = DispatcherBuilder::default().dispatcher()?;
//!   let body = dispatcher
//!       .request("https://api.github.com/repos/rust-lang/rust", RequestOptions::default())
//!       .await?;
//!   println!("{}", body["full_name"]);
//!   Ok(())
//! }
//! ```
//!
//! The [`Dispatcher`] is cheap to clone and meant to be created once and
//! shared. Requests to the same URL made while one is in flight share its
//! result:
//!
//! ```no_run
//! use corral_lib::{DispatcherBuilder, RequestOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let dispatcher = DispatcherBuilder::builder()
//!       .concurrency(2_usize)
//!       .build()
//!       .dispatcher()?;
//!   let url = "https://example.com/data.json";
//!   let (a, b) = tokio::join!(
//!       dispatcher.request(url, RequestOptions::default()),
//!       dispatcher.request(url, RequestOptions::default()),
//!   );
//!   assert_eq!(a?, b?);
//!   assert_eq!(dispatcher.stats().transport_calls, 1);
//!   Ok(())
//! }
//! ```
#![deny(missing_docs)]

mod dispatcher;
mod transport;
mod types;

pub mod admission;
pub mod dedup;

pub use dispatcher::{DEFAULT_USER_AGENT, DispatchStats, Dispatcher, DispatcherBuilder};
pub use transport::{ReqwestTransport, Transport};
pub use types::*;
