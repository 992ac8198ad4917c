pub mod closer;
pub mod gateway;
pub mod stats;

#[cfg(test)]
pub(crate) mod memory;

pub use closer::{close_round, ClosedRound};
pub use gateway::{NewMovieRoundRanking, RoundGateway, RoundTransaction};
