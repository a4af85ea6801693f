pub mod connection;
pub mod dispatch;
pub mod membership;
pub mod push;
pub mod registry;
pub mod surfaces;
pub mod unread;

pub use dispatch::DispatchEngine;
pub use membership::MembershipProvider;
pub use push::{PushPayload, PushProvider};
pub use registry::Registry;
pub use unread::UnreadAggregator;
