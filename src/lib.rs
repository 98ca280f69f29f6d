//! DoorLink - BLE door-access protocol engine.
//!
//! Rust implementation of the DoorLink protocol: an intercom peripheral
//! and a mobile central performing mutual authentication and an
//! encrypted unlock exchange over a pair of GATT characteristics. Both
//! engines are typed-event state machines, transport-agnostic above ATT.

mod backend;
mod beacon;
mod central;
mod credential;
mod crypto;
mod engine;
mod frame;
mod keys;
mod ratelimit;
mod session;
mod signature;
mod store;
mod types;

pub mod gatt;

// The two symmetric-key protocol variants keep their own namespaces
// because their message vocabularies overlap with the primary flow.
pub mod diversified;
pub mod symmetric;

pub use backend::*;
pub use beacon::*;
pub use central::*;
pub use credential::*;
pub use crypto::*;
pub use engine::*;
pub use frame::*;
pub use keys::*;
pub use ratelimit::*;
pub use session::*;
pub use signature::*;
pub use store::*;
pub use types::*;
