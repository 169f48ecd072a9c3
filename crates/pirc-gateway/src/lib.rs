pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::{ConnectionId, SessionRegistry};
