use crate::error::StoreError;
use crate::models::{LinkedRanking, ProposalOwner, RatingVote, Round, Score, UserRankingAverages};
use async_trait::async_trait;

/// Data for a ranking record that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovieRoundRanking {
    pub round_id: String,
    pub movie_id: String,
    pub owner: ProposalOwner,
    pub average_rating: Score,
    pub is_round_winner: bool,
}

/// Storage that round closure runs against.
///
/// All reads and writes of one close happen inside a single
/// [`RoundTransaction`]; nothing it wrote is visible until `commit`, and
/// dropping it without committing discards every write.
#[async_trait]
pub trait RoundGateway: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RoundTransaction + '_>, StoreError>;
}

#[async_trait]
pub trait RoundTransaction: Send {
    /// The round with its proposals, or `None` if it does not exist.
    async fn load_round(&mut self, round_id: &str) -> Result<Option<Round>, StoreError>;

    async fn load_movie_rating_votes(
        &mut self,
        round_id: &str,
        movie_id: &str,
    ) -> Result<Vec<RatingVote>, StoreError>;

    /// Returns the new record's id.
    async fn create_movie_round_ranking(
        &mut self,
        ranking: &NewMovieRoundRanking,
    ) -> Result<String, StoreError>;

    async fn link_votes_to_ranking(
        &mut self,
        round_id: &str,
        movie_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError>;

    /// Id of the user's ranking in the group, created empty if missing.
    async fn upsert_user_ranking(&mut self, user_id: &str, group_id: &str) -> Result<String, StoreError>;

    async fn link_ranking_to_user_ranking(
        &mut self,
        user_ranking_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError>;

    async fn load_user_ranking_links(&mut self, user_ranking_id: &str) -> Result<Vec<LinkedRanking>, StoreError>;

    async fn update_user_ranking_averages(
        &mut self,
        user_ranking_id: &str,
        averages: &UserRankingAverages,
    ) -> Result<(), StoreError>;

    /// Must fail with [`StoreError::Conflict`] if the round was closed by someone else.
    async fn mark_round_closed(&mut self, round_id: &str, oscarable: bool) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
