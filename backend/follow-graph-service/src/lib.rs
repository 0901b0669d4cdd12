//! Follow graph consistency component
//!
//! Follow/unfollow between users with denormalized follower and following
//! counts. PostgreSQL holds edges and aggregates; a versioned cache serves
//! the counts.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod workers;

pub use auth::CallerIdentity;
pub use domain::{Address, FollowAggregate, FollowingSnapshot};
pub use error::{FollowGraphError, FollowGraphResult, StoreError};
pub use services::{FollowGraphConfig, FollowGraphService};
