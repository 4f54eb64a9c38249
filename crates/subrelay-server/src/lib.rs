//! # subrelay-server
//!
//! Everything between the host's control bus and the event stream:
//!
//! - [`AccountRegistry`]: configured accounts, each with a credential store,
//!   at most one live session, and the subscriptions registered on it.
//!   Survives reconnects by re-registering on the new session before the old
//!   one is retired.
//! - [`ControlRouter`]: decodes control requests, dispatches them to the
//!   registry, and answers every message that can be answered.
//! - [`bus`]: the host bus seam, with in-process and JSON-lines
//!   implementations.
//! - [`ShutdownCoordinator`]: cancellation and orderly session teardown.

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod registry;
pub mod router;
pub mod shutdown;
pub mod subscriptions;

pub use bus::{ChannelBus, ControlMessage, HostBus, Reply, StdioBus};
pub use errors::RegistryError;
pub use registry::{AccountRegistry, RegistryConfig};
pub use router::ControlRouter;
pub use shutdown::ShutdownCoordinator;
pub use subscriptions::SubscriptionRecord;
