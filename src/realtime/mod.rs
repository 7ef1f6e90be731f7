pub mod events;
pub mod publisher;

pub use publisher::{EventPublisher, RedisPublisher};
