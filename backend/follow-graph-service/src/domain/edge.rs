use super::Address;
use crate::error::FollowGraphError;
use chrono::{DateTime, Utc};
use follow_cache::AggregateEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest page served by follower/following listings
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Directed follow relation: `follower` subscribes to `target`'s content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower: Address,
    pub target: Address,
    pub created_at: DateTime<Utc>,
}

/// Denormalized follower/following counts of a user.
///
/// `version` moves forward every time the row behind this aggregate changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowAggregate {
    pub address: Address,
    pub followers_count: u64,
    pub following_count: u64,
    pub version: u64,
}

impl FollowAggregate {
    /// Aggregate of a user nobody follows and who follows nobody
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            followers_count: 0,
            following_count: 0,
            version: 0,
        }
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.followers_count, self.following_count)
    }
}

impl From<&FollowAggregate> for AggregateEntry {
    fn from(aggregate: &FollowAggregate) -> Self {
        AggregateEntry::new(
            aggregate.address.as_str(),
            aggregate.followers_count,
            aggregate.following_count,
            aggregate.version,
        )
    }
}

impl TryFrom<AggregateEntry> for FollowAggregate {
    type Error = FollowGraphError;

    fn try_from(entry: AggregateEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            address: Address::parse(entry.address)?,
            followers_count: entry.followers_count,
            following_count: entry.following_count,
            version: entry.version,
        })
    }
}

/// The follower's complete edge set right after a mutation, so callers can
/// render button state without fetching again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingSnapshot {
    pub address: Address,
    /// Followed address -> when the edge was created
    pub following: BTreeMap<Address, DateTime<Utc>>,
    pub aggregate: FollowAggregate,
}

impl FollowingSnapshot {
    pub fn is_following(&self, target: &Address) -> bool {
        self.following.contains_key(target)
    }
}

/// One page of a follower or following listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipPage {
    pub addresses: Vec<Address>,
    pub total_count: u64,
    pub has_more: bool,
}

impl RelationshipPage {
    pub fn empty() -> Self {
        Self {
            addresses: Vec::new(),
            total_count: 0,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_aggregate_entry_conversion() {
        let aggregate = FollowAggregate {
            address: addr("SP1"),
            followers_count: 12,
            following_count: 3,
            version: 9,
        };

        let entry = AggregateEntry::from(&aggregate);
        assert_eq!(entry.address, "SP1");
        assert_eq!(entry.version, 9);

        let back = FollowAggregate::try_from(entry).unwrap();
        assert_eq!(back, aggregate);
    }

    #[test]
    fn test_corrupt_entry_address_is_rejected() {
        let entry = AggregateEntry::new("", 1, 1, 1);
        assert!(FollowAggregate::try_from(entry).is_err());
    }

    #[test]
    fn test_snapshot_is_following() {
        let mut following = BTreeMap::new();
        following.insert(addr("SP2"), Utc::now());
        let snapshot = FollowingSnapshot {
            address: addr("SP1"),
            following,
            aggregate: FollowAggregate::empty(addr("SP1")),
        };

        assert!(snapshot.is_following(&addr("SP2")));
        assert!(!snapshot.is_following(&addr("SP3")));
    }
}
