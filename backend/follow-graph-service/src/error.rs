/// Error types for follow-graph-service
use thiserror::Error;

/// Constraint that keeps self edges out of the `follows` table
const SELF_FOLLOW_CONSTRAINT: &str = "follows_no_self_follow";

/// Failures raised by a follow graph store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// The (follower, target) uniqueness constraint rejected an insert
    #[error("Follow edge already exists")]
    UniqueViolation,

    #[error("Follow edge not found")]
    EdgeNotFound,

    #[error("Self follow rejected by store")]
    SelfEdge,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation;
            }
            if db_err.is_check_violation() && db_err.constraint() == Some(SELF_FOLLOW_CONSTRAINT)
            {
                return StoreError::SelfEdge;
            }
        }
        StoreError::Database(err)
    }
}

impl StoreError {
    /// Connection level failures worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed failures of follow graph operations.
///
/// Every variant is recoverable at the caller boundary; the presentation layer
/// picks user-facing wording from [`FollowGraphError::code`].
#[derive(Error, Debug)]
pub enum FollowGraphError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Already following this user")]
    AlreadyFollowing,

    #[error("Not following this user")]
    NotFollowing,

    #[error("Users cannot follow themselves")]
    SelfFollowRejected,

    /// A concurrent identical follow won the race on the uniqueness constraint
    #[error("Concurrent follow detected")]
    PersistenceConflict,

    #[error("Too many follow requests")]
    RateLimited,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Store call timed out")]
    Timeout,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for FollowGraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation => FollowGraphError::PersistenceConflict,
            StoreError::EdgeNotFound => FollowGraphError::NotFollowing,
            StoreError::SelfEdge => FollowGraphError::SelfFollowRejected,
            other => FollowGraphError::Store(other),
        }
    }
}

impl FollowGraphError {
    /// Stable machine readable code
    pub fn code(&self) -> &'static str {
        match self {
            FollowGraphError::Unauthenticated => "unauthenticated",
            FollowGraphError::AlreadyFollowing => "already_following",
            FollowGraphError::NotFollowing => "not_following",
            FollowGraphError::SelfFollowRejected => "self_follow_rejected",
            FollowGraphError::PersistenceConflict => "persistence_conflict",
            FollowGraphError::RateLimited => "rate_limited",
            FollowGraphError::InvalidAddress(_) => "invalid_address",
            FollowGraphError::Timeout => "timeout",
            FollowGraphError::Store(_) => "store_error",
        }
    }

    /// The edge already exists, whether seen by the pre-check or by the store
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            FollowGraphError::AlreadyFollowing | FollowGraphError::PersistenceConflict
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FollowGraphError::Timeout | FollowGraphError::RateLimited => true,
            FollowGraphError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for follow graph operations
pub type FollowGraphResult<T> = Result<T, FollowGraphError>;
