//! Peer manager, lookup, access plane, and relay plane for QuantumGate
//! sessions (§4.9 - §4.14, §5).
//!
//! [`scheduler::PeerManager`] owns every [`quantumgate_core::Peer`], spreads
//! them across several thread pools, and drives their lifecycle and
//! send/receive processing to completion. The other modules are the
//! supporting planes it coordinates: [`lookup`] for querying connected
//! peers, [`access`] for IP filtering, subnet caps, and reputation,
//! [`endpoint`] for inferring this node's own public endpoints, and
//! [`relay`] for splicing two peer sessions into one relayed path.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod endpoint;
pub mod lookup;
pub mod relay;
pub mod scheduler;

pub use access::{AttemptLimiter, IpFilter, ReputationTable, SubnetLimits};
pub use endpoint::EndpointInference;
pub use lookup::{LookupMaps, QueryParams};
pub use relay::{RelayPort, RelayTable};
pub use scheduler::{AccessPlane, DeliveredMessage, PeerManager};
