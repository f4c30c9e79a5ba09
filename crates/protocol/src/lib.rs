//! Wire types shared between tether front-ends and the session core.
//!
//! Everything here is plain data plus the text formats front-ends rely on:
//! offline credential records, session tokens, invitation addresses and SAS
//! codes. Nothing in this crate performs I/O.

mod error;
pub mod invitation;
pub mod offline_key;
pub mod sas;
pub mod types;

pub use error::{ProtocolError, RecordFormatError, Result};
pub use invitation::{InvitationAddr, InvitationKind, InvitationToken};
pub use offline_key::OfflineRecord;
pub use sas::{SAS_CANDIDATES, SasCode, sas_candidates};
pub use types::{HumanHandle, OrganizationId, SessionToken, UserProfile};
