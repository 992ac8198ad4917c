pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod rounds;
pub mod tasks;
pub mod voting;

pub use error::{BallotError, CloseRoundError, RatingError, RoundNotReady, StoreError};
pub use rounds::{close_round, ClosedRound};
pub use voting::{rank, Ballot, SchulzeRanking};
