//! Model-call decorators: a scripted model for tests and demos, and a
//! retrying wrapper for real transports.

pub mod mock;
pub mod reliable;

pub use mock::{tool_call, MockModel, MockResponse};
pub use reliable::{ReliableConfig, ReliableModel};
