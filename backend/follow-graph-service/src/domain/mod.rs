pub mod address;
pub mod edge;
pub mod user;

pub use address::Address;
pub use edge::{FollowAggregate, FollowEdge, FollowingSnapshot, RelationshipPage};
pub use user::{FollowAction, ProfileSummary, SubscriptionBadge, User, UserSettings};
