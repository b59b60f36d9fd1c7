pub mod broadcaster;
pub mod subscriber;

pub use broadcaster::{route, EventBroadcaster, HubRoute};
pub use subscriber::{EventListener, FnListener, Subscriber};
