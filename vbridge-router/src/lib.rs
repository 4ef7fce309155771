//! vbridge routing core
//!
//! Moves live frames from one capture endpoint (card input or network
//! receiver) to one output endpoint (network sender or card output),
//! normalizing to packed BGR in between, with optional preview fan-out.
//!
//! Key points:
//! - Frames are converted exactly once entering and once leaving the core
//! - No queue between source and sink; one frame in flight per router
//! - Native resources live in a [`session::DeviceSession`] and native
//!   runtimes are reference counted, so teardown order is explicit
//! - Switching endpoints is always stop-then-start

pub mod config;
pub mod discovery;
pub mod emitter;
pub mod error;
pub mod events;
pub mod identity;
pub mod preview;
pub mod router;
pub mod session;
pub mod sink;
pub mod source;

pub use config::BridgeConfig;
pub use discovery::Discovery;
pub use error::{BridgeError, ErrorKind, Result};
pub use events::{RouterEvent, RouterState};
pub use identity::{EndpointIdentity, EndpointSelection, SinkSelection};
pub use router::{Backends, FrameRouter, RouterStats};
