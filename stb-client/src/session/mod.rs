//! Session negotiation against the STB control port.
//!
//! A fetch walks the ranked candidate table. Each candidate gets a fresh
//! [`Session`]: connect, optional login, the command burst, then a bounded
//! drain. The first candidate whose payloads yield a non-empty catalog is
//! committed for that call only.

pub mod attempt;
pub mod candidate;
pub mod negotiator;

#[cfg(test)]
pub(crate) mod mock;

pub use attempt::{AttemptState, DeviceIdentity, DrainEnd, Session, SessionSettings};
pub use candidate::{default_candidate_specs, CandidateConfig, CandidateSpec, SequenceKind, WindowPlan, CONTROL_PORT};
pub use negotiator::{AttemptReport, FetchOutcome, Negotiator};
