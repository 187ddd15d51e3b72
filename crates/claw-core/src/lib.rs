//! Data model shared by every claw crate: identities, conversation messages,
//! tool contracts, the model-call contract and the agent event stream.

pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod model;
pub mod policy;
pub mod tools;
