//! Async SSH session client.
//!
//! A [`SessionClient`] owns one connection to a remote host and exposes
//! command execution, interactive shells and a remote filesystem on top of
//! it. The SSH implementation itself sits behind the traits in
//! [`transport`]: [`transport::memory`] provides an in-process host for
//! tests, and the `russh` feature enables a transport backed by the
//! [russh](https://crates.io/crates/russh) library.
//!
//! ```no_run
//! use ssh2_client::{transport::memory::MemoryHost, SessionClient};
//!
//! # async fn example() -> ssh2_client::error::ClientResult<()> {
//! let host = MemoryHost::new();
//! host.add_user("deploy", "secret");
//!
//! let mut session = SessionClient::connect(&host.connector(), "localhost", 22).await?;
//! if session.auth_by_password("deploy", "secret").await {
//!     let user = session.execute("whoami", None).await?;
//!     session.fs().write("greeting.txt", user.as_bytes()).await?;
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate async_trait;

/// Session, shell and filesystem client
pub mod client;
pub mod config;
mod diagnostics;
pub mod error;
/// Protocol-level value types
pub mod protocol;
pub mod transport;
mod utils;

pub use client::SessionClient;
pub use config::{ClientConfig, TerminalConfig};
pub use error::Error;
pub use transport::Credentials;
