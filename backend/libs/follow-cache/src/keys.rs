//! Cache key schema
//!
//! Key format: v{VERSION}:{entity}:{sub_entity}:{address}

/// Cache schema version - increment when changing key formats or entry layout
pub const CACHE_VERSION: u32 = 1;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Follower/following counts of a user
    /// Format: v1:follow:aggregate:{address}
    pub fn aggregate(address: &str) -> String {
        format!("v{}:follow:aggregate:{}", CACHE_VERSION, address)
    }

    /// Extract entity type from key
    pub fn entity_type(key: &str) -> Option<&str> {
        let mut parts = key.split(':');
        parts.next()?;
        parts.next()
    }

    /// Extract the address from an aggregate key
    pub fn address_of(key: &str) -> Option<&str> {
        let prefix = format!("v{}:follow:aggregate:", CACHE_VERSION);
        key.strip_prefix(prefix.as_str())
            .filter(|address| !address.is_empty())
    }
}
