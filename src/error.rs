use std::fmt;
use thiserror::Error;

/// A rating fell outside the closed 0..=5 scale.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RatingError {
    #[error("rating {0} is outside the 0 to 5 scale")]
    OutOfRange(f64),
    #[error("rating is not a finite number")]
    NotFinite,
}

/// Raw ballot data that cannot be turned into an ordered ballot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("rank key '{0}' is not a number")]
    NonNumericRank(String),
    #[error("rank keys '{first}' and '{second}' denote the same rank")]
    DuplicateRank { first: String, second: String },
    #[error("movie {0} appears more than once in the ballot")]
    DuplicateCandidate(String),
    #[error("malformed ballot: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for BallotError {
    fn from(e: serde_json::Error) -> Self {
        BallotError::Malformed(e.to_string())
    }
}

/// Failures surfaced by a persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid ballot: {0}")]
    InvalidBallot(#[from] BallotError),
}

impl StoreError {
    /// Whether re-running the whole operation may succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY / SQLITE_LOCKED
                matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"))
            }
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

impl From<RatingError> for StoreError {
    fn from(e: RatingError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Proposals blocking a round from closing, grouped by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundNotReady {
    pub round_id: String,
    pub open_proposals: Vec<String>,
    pub closed_without_winner: Vec<String>,
    pub winner_without_votes: Vec<String>,
}

impl RoundNotReady {
    pub fn new(round_id: &str) -> Self {
        Self {
            round_id: round_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.open_proposals.is_empty()
            && self.closed_without_winner.is_empty()
            && self.winner_without_votes.is_empty()
    }
}

impl fmt::Display for RoundNotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {} is not ready to close", self.round_id)?;
        let categories = [
            ("still open", &self.open_proposals),
            ("closed without a winner", &self.closed_without_winner),
            ("winner has no ratings", &self.winner_without_votes),
        ];
        for (label, ids) in categories {
            if !ids.is_empty() {
                write!(f, "; {}: {}", label, ids.join(", "))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CloseRoundError {
    #[error("round {0} not found")]
    RoundNotFound(String),
    #[error("{0}")]
    NotReady(RoundNotReady),
    #[error("round {0} is already closed")]
    AlreadyClosed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CloseRoundError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloseRoundError::Store(e) if e.is_retryable())
    }
}
