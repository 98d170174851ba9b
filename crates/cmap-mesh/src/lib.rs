//! # cmap-mesh
//!
//! Message routing for a cmap agency. Agencies of one MAS form a mesh: each
//! one delivers messages to its own agents directly and ships everything
//! else to the agency hosting the receiver.
//!
//! ```text
//!   agents ──► outbound queue ──► MessageRouter ──► local inbox
//!                                      │
//!                                      ├──► directory lookup (first contact)
//!                                      ▼
//!                         per-agency queue ──► RemoteDeliveryWorker ──► POST /api/agency/msgs
//! ```
//!
//! The [`RoutingTable`] is the only shared mutable state; it is guarded by a
//! single lock that is never held across an `.await`.

pub mod delivery;
pub mod directory;
pub mod handle;
pub mod router;
pub mod table;
pub mod transport;

pub use delivery::{DeliveryContext, RemoteDeliveryWorker};
pub use directory::{AddressResolver, HttpDirectory, StaticDirectory};
pub use handle::{AgentHandle, StateRecord};
pub use router::MessageRouter;
pub use table::{RemoteRoute, Resolution, RoutingTable};
pub use transport::{ChannelTransport, HttpTransport, Transport};
