//! Session and enrollment lifecycle core.
//!
//! Everything long-lived (a logged-in session, an in-progress invitation
//! handshake) runs as a component of one shared
//! [`ComponentRegistry`](tether_runtime::ComponentRegistry):
//!
//! - [`SessionManager`] maps session tokens to running cores, with login
//!   deduplication and an offline unlock path.
//! - [`EnrollmentManager`] hosts the claim and greet step machines, one
//!   context per invitation address.
//!
//! The storage engine itself is a collaborator behind [`Engine`] and
//! [`InviteEngine`]; [`testing`] provides in-memory versions of both.

pub mod config;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod enrollment;
mod error;
pub mod offline;
pub mod session;
pub mod testing;

pub use config::CoreConfig;
pub use device::{AvailableDevice, LocalDevice};
pub use engine::{Engine, InviteEngine};
pub use enrollment::claim::{ClaimHandshake, ClaimInfo, ClaimStep, ClaimerPeer};
pub use enrollment::greet::{ClaimRequest, GreetGrant, GreetHandshake, GreetStep, GreeterPeer};
pub use enrollment::{EnrollmentCtx, EnrollmentManager, Handshake, Step, StepSlot};
pub use error::{CryptoError, Error, Result};
pub use session::{Credentials, DeviceSession, SessionManager};
pub use tether_protocol as protocol;
pub use tether_runtime as runtime;

/// Claim contexts hosted for the claimers connected through `E`.
pub type ClaimersManager<E> = EnrollmentManager<<E as InviteEngine>::Claimer, ClaimStep>;

/// Greet contexts hosted for the greeters connected through `E`.
pub type GreetersManager<E> = EnrollmentManager<<E as InviteEngine>::Greeter, GreetStep>;
