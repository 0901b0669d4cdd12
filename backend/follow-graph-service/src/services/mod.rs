pub mod follow;
pub mod throttle;

pub use follow::{FollowGraphConfig, FollowGraphService};
pub use throttle::{FollowThrottle, ThrottleConfig};
