//! In-memory gateway for exercising round closure without a database.
//!
//! A transaction works on a copy of the state taken at `begin` and swaps it
//! in on `commit`, so an aborted close leaves the shared state untouched.
//! Commits are optimistic: one fails if another committed since `begin`.

use crate::error::StoreError;
use crate::models::{
    new_id, ExternalScores, LinkedRanking, MovieRoundRanking, RatingVote, Round, UserRanking,
    UserRankingAverages,
};
use crate::rounds::gateway::{NewMovieRoundRanking, RoundGateway, RoundTransaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub version: u64,
    pub rounds: HashMap<String, Round>,
    pub votes: Vec<RatingVote>,
    pub movie_scores: HashMap<String, ExternalScores>,
    pub rankings: HashMap<String, MovieRoundRanking>,
    /// (round, user, movie) -> ranking id
    pub vote_links: HashMap<(String, String, String), String>,
    pub user_rankings: HashMap<String, UserRanking>,
    pub user_ranking_links: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
    fail_after_rankings: Mutex<Option<usize>>,
}

impl MemoryGateway {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn add_round(&self, round: Round) {
        self.lock().rounds.insert(round.id.clone(), round);
    }

    pub fn add_vote(&self, vote: RatingVote) {
        self.lock().votes.push(vote);
    }

    pub fn add_movie_scores(&self, movie_id: &str, scores: ExternalScores) {
        self.lock().movie_scores.insert(movie_id.to_string(), scores);
    }

    /// Makes every later transaction fail once it has created `n` rankings.
    pub fn fail_after_rankings(&self, n: usize) {
        *self.fail_after_rankings.lock().unwrap() = Some(n);
    }

    pub fn clear_failure(&self) {
        *self.fail_after_rankings.lock().unwrap() = None;
    }

    pub fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }
}

#[async_trait]
impl RoundGateway for MemoryGateway {
    async fn begin(&self) -> Result<Box<dyn RoundTransaction + '_>, StoreError> {
        let working = self.snapshot();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            base_version: working.version,
            working,
            created: 0,
            fail_after: *self.fail_after_rankings.lock().unwrap(),
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<MemoryState>>,
    base_version: u64,
    working: MemoryState,
    created: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl RoundTransaction for MemoryTransaction {
    async fn load_round(&mut self, round_id: &str) -> Result<Option<Round>, StoreError> {
        Ok(self.working.rounds.get(round_id).cloned())
    }

    async fn load_movie_rating_votes(
        &mut self,
        round_id: &str,
        movie_id: &str,
    ) -> Result<Vec<RatingVote>, StoreError> {
        Ok(self
            .working
            .votes
            .iter()
            .filter(|v| v.round_id == round_id && v.movie_id == movie_id)
            .cloned()
            .collect())
    }

    async fn create_movie_round_ranking(
        &mut self,
        ranking: &NewMovieRoundRanking,
    ) -> Result<String, StoreError> {
        if self.fail_after == Some(self.created) {
            return Err(StoreError::Conflict("injected failure".to_string()));
        }
        let duplicate = self
            .working
            .rankings
            .values()
            .any(|r| r.round_id == ranking.round_id && r.movie_id == ranking.movie_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "movie {} already ranked in round {}",
                ranking.movie_id, ranking.round_id
            )));
        }
        self.created += 1;
        let id = new_id();
        self.working.rankings.insert(
            id.clone(),
            MovieRoundRanking {
                id: id.clone(),
                round_id: ranking.round_id.clone(),
                movie_id: ranking.movie_id.clone(),
                owner: ranking.owner.clone(),
                average_rating: ranking.average_rating,
                is_round_winner: ranking.is_round_winner,
            },
        );
        Ok(id)
    }

    async fn link_votes_to_ranking(
        &mut self,
        round_id: &str,
        movie_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError> {
        let keys: Vec<_> = self
            .working
            .votes
            .iter()
            .filter(|v| v.round_id == round_id && v.movie_id == movie_id)
            .map(|v| (v.round_id.clone(), v.user_id.clone(), v.movie_id.clone()))
            .collect();
        for key in keys {
            self.working.vote_links.insert(key, ranking_id.to_string());
        }
        Ok(())
    }

    async fn upsert_user_ranking(&mut self, user_id: &str, group_id: &str) -> Result<String, StoreError> {
        if let Some(existing) = self
            .working
            .user_rankings
            .values()
            .find(|u| u.user_id == user_id && u.group_id == group_id)
        {
            return Ok(existing.id.clone());
        }
        let id = new_id();
        self.working.user_rankings.insert(
            id.clone(),
            UserRanking {
                id: id.clone(),
                user_id: user_id.to_string(),
                group_id: group_id.to_string(),
                averages: UserRankingAverages::default(),
            },
        );
        Ok(id)
    }

    async fn link_ranking_to_user_ranking(
        &mut self,
        user_ranking_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError> {
        let link = (user_ranking_id.to_string(), ranking_id.to_string());
        if !self.working.user_ranking_links.contains(&link) {
            self.working.user_ranking_links.push(link);
        }
        Ok(())
    }

    async fn load_user_ranking_links(&mut self, user_ranking_id: &str) -> Result<Vec<LinkedRanking>, StoreError> {
        let state = &self.working;
        Ok(state
            .user_ranking_links
            .iter()
            .filter(|(user_ranking, _)| user_ranking == user_ranking_id)
            .filter_map(|(_, ranking_id)| state.rankings.get(ranking_id))
            .map(|r| LinkedRanking {
                ranking_id: r.id.clone(),
                average_rating: Some(r.average_rating),
                scores: state.movie_scores.get(&r.movie_id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn update_user_ranking_averages(
        &mut self,
        user_ranking_id: &str,
        averages: &UserRankingAverages,
    ) -> Result<(), StoreError> {
        let user_ranking = self
            .working
            .user_rankings
            .get_mut(user_ranking_id)
            .ok_or_else(|| StoreError::NotFound(format!("user ranking {}", user_ranking_id)))?;
        user_ranking.averages = *averages;
        Ok(())
    }

    async fn mark_round_closed(&mut self, round_id: &str, oscarable: bool) -> Result<(), StoreError> {
        let round = self
            .working
            .rounds
            .get_mut(round_id)
            .ok_or_else(|| StoreError::NotFound(format!("round {}", round_id)))?;
        if round.is_closed {
            return Err(StoreError::Conflict(format!("round {} is already closed", round_id)));
        }
        round.is_closed = true;
        round.is_oscarable = oscarable;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;
        let mut shared = this.shared.lock().unwrap();
        if shared.version != this.base_version {
            return Err(StoreError::Conflict(format!(
                "expected version {} but found {}",
                this.base_version, shared.version
            )));
        }
        this.working.version = this.base_version + 1;
        *shared = this.working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounds::closer::close_round;

    fn empty_round(gateway: &MemoryGateway) {
        gateway.add_round(Round {
            id: "r1".to_string(),
            group_id: "g1".to_string(),
            created_at: chrono::Utc::now(),
            ends_at: None,
            is_closed: false,
            is_oscarable: false,
            proposals: Vec::new(),
        });
    }

    #[tokio::test]
    async fn closed_round_cannot_be_marked_again() {
        let gateway = MemoryGateway::default();
        empty_round(&gateway);
        close_round(&gateway, "r1").await.unwrap();

        let mut tx = gateway.begin().await.unwrap();
        let err = tx.mark_round_closed("r1", true).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn stale_transaction_cannot_commit() {
        let gateway = MemoryGateway::default();
        empty_round(&gateway);

        let mut stale = gateway.begin().await.unwrap();
        stale.mark_round_closed("r1", false).await.unwrap();

        close_round(&gateway, "r1").await.unwrap();
        let err = stale.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gateway.snapshot().version, 1);
    }
}
