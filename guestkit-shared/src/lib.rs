//! Types shared by every layer that talks to the guestkit appliance.
//!
//! The handle core, the launch sequence and the protocol layer all report
//! failures through [`GuestkitError`] and agree on the constants in
//! [`constants`].

pub mod constants;
pub mod errors;

pub use errors::{GuestkitError, GuestkitResult};
