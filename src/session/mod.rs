//! The broadcast session: one encode, fanned out to every destination, with
//! at most one session alive at a time.

pub mod controller;
pub mod destination;
pub mod error;
pub mod mode;
pub mod types;

pub use controller::{EncoderSettings, SessionController};
pub use destination::DestinationDescriptor;
pub use error::SessionError;
pub use mode::{Scene, SessionMode};
pub use types::{PushOutcome, SessionSnapshot, SessionStatus, StartRequest};
