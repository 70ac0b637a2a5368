//! Client-side state sync for the cue control server.
//!
//! A [`CueSession`] owns one [`Store`], a [`RestClient`] for request/response
//! calls and a [`Transport`] for server push. Push frames reach the store
//! through the [`EventRouter`]; REST results are dispatched directly.

pub mod error;
pub mod rest;
pub mod router;
pub mod selectors;
pub mod session;
pub mod store;
pub mod transport;

pub use error::ClientError;
pub use rest::RestClient;
pub use router::{EventRouter, RouterHandle};
pub use session::{CueSession, SessionConfig};
pub use store::{AppState, Store, Subscription, SystemMessage, Transition};
pub use transport::{BackoffPolicy, Transport, TransportConfig};
