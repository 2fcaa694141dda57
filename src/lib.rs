#![warn(clippy::pedantic)]
// Noisy doc/signature lints that would require annotating most pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Keeping format!("{}", x) over format!("{x}") with complex expressions
#![allow(clippy::uninlined_format_args)]
// Intentional casts in timestamp/count handling
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
// newsletter::NewsletterApi and friends
#![allow(clippy::module_name_repetitions)]

//! Session orchestration for WhatsApp-style messaging transports.
//!
//! The transport itself (wire encoding, crypto, socket I/O) is an external
//! collaborator behind the [`transport::Transport`] trait. This crate owns
//! everything above it: the connection/reconnect state machine, inbound
//! event normalization, the group-metadata cache, and the newsletter query
//! surface.

pub mod cache;
pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod newsletter;
pub mod query;
pub mod session;
pub mod transport;

pub use config::{ReconnectPolicy, SessionConfig};
pub use connection::ConnectionStatus;
pub use errors::SocketonError;
pub use events::{NormalizedMessage, SessionEventHandler};
pub use session::Session;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
