use crate::error::{CloseRoundError, RoundNotReady, StoreError};
use crate::models::{MovieRoundRanking, Proposal, RatingVote, Round, Score};
use crate::rounds::gateway::{NewMovieRoundRanking, RoundGateway, RoundTransaction};
use crate::rounds::stats;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// What a successful close produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedRound {
    pub round_id: String,
    pub winning_average: Option<Score>,
    pub rankings: Vec<MovieRoundRanking>,
    pub user_rankings: Vec<String>, // Ids of recomputed user rankings
    pub oscarable: bool,
}

impl ClosedRound {
    pub fn winners(&self) -> impl Iterator<Item = &MovieRoundRanking> {
        self.rankings.iter().filter(|r| r.is_round_winner)
    }
}

// A proposal's winning movie with its round average
struct Outcome<'a> {
    proposal: &'a Proposal,
    movie_id: &'a str,
    average: Score,
}

/// Closes a round and folds its results into the owners' user rankings.
///
/// Everything runs inside one gateway transaction. Validation of every
/// proposal happens before the first write; if any proposal blocks the close,
/// all of them are reported in [`RoundNotReady`] and nothing is written.
/// A round that is already closed is rejected with
/// [`CloseRoundError::AlreadyClosed`].
pub async fn close_round<G>(gateway: &G, round_id: &str) -> Result<ClosedRound, CloseRoundError>
where
    G: RoundGateway + ?Sized,
{
    let mut tx = gateway.begin().await?;

    let round = tx
        .load_round(round_id)
        .await?
        .ok_or_else(|| CloseRoundError::RoundNotFound(round_id.to_string()))?;
    if round.is_closed {
        return Err(CloseRoundError::AlreadyClosed(round_id.to_string()));
    }

    let votes = match check_ready(&mut *tx, &round).await? {
        Ok(votes) => votes,
        Err(not_ready) => {
            warn!("{}", not_ready);
            return Err(CloseRoundError::NotReady(not_ready));
        }
    };

    let outcomes = proposal_outcomes(&round, &votes);
    let winning_average = stats::winning_average(outcomes.iter().map(|o| &o.average));

    let Some(best) = winning_average else {
        tx.mark_round_closed(&round.id, false).await?;
        tx.commit().await?;
        info!("Closed round {} without any rated movies", round.id);
        return Ok(ClosedRound {
            round_id: round.id,
            winning_average: None,
            rankings: Vec::new(),
            user_rankings: Vec::new(),
            oscarable: false,
        });
    };

    let mut rankings = Vec::with_capacity(outcomes.len());
    let mut touched: BTreeSet<String> = BTreeSet::new();
    for outcome in &outcomes {
        let new_ranking = NewMovieRoundRanking {
            round_id: round.id.clone(),
            movie_id: outcome.movie_id.to_string(),
            owner: outcome.proposal.owner.clone(),
            average_rating: outcome.average,
            is_round_winner: outcome.average == best,
        };
        let ranking_id = tx.create_movie_round_ranking(&new_ranking).await?;
        tx.link_votes_to_ranking(&round.id, outcome.movie_id, &ranking_id).await?;
        debug!(
            "Ranked movie {} in round {} at {} (winner: {})",
            outcome.movie_id, round.id, outcome.average, new_ranking.is_round_winner
        );

        for user_id in outcome.proposal.owner.users() {
            let user_ranking_id = tx.upsert_user_ranking(&user_id, &round.group_id).await?;
            tx.link_ranking_to_user_ranking(&user_ranking_id, &ranking_id).await?;
            touched.insert(user_ranking_id);
        }

        rankings.push(MovieRoundRanking {
            id: ranking_id,
            round_id: new_ranking.round_id,
            movie_id: new_ranking.movie_id,
            owner: new_ranking.owner,
            average_rating: new_ranking.average_rating,
            is_round_winner: new_ranking.is_round_winner,
        });
    }

    for user_ranking_id in &touched {
        refresh_user_ranking(&mut *tx, user_ranking_id).await?;
    }

    tx.mark_round_closed(&round.id, true).await?;
    tx.commit().await?;

    info!(
        "Closed round {}: {} movies ranked, best average {}, {} user rankings updated",
        round.id,
        rankings.len(),
        best,
        touched.len()
    );

    Ok(ClosedRound {
        round_id: round.id,
        winning_average: Some(best),
        rankings,
        user_rankings: touched.into_iter().collect(),
        oscarable: true,
    })
}

/// Recomputes one user ranking from everything currently linked to it.
pub async fn refresh_user_ranking(
    tx: &mut (dyn RoundTransaction + '_),
    user_ranking_id: &str,
) -> Result<(), StoreError> {
    let links = tx.load_user_ranking_links(user_ranking_id).await?;
    let averages = stats::recompute_user_ranking(&links);
    tx.update_user_ranking_averages(user_ranking_id, &averages).await
}

// Either the rating votes of every winner movie, or every reason the round cannot close.
async fn check_ready(
    tx: &mut (dyn RoundTransaction + '_),
    round: &Round,
) -> Result<Result<HashMap<String, Vec<RatingVote>>, RoundNotReady>, StoreError> {
    let mut not_ready = RoundNotReady::new(&round.id);
    let mut votes: HashMap<String, Vec<RatingVote>> = HashMap::new();

    for proposal in &round.proposals {
        if !proposal.is_closed {
            not_ready.open_proposals.push(proposal.id.clone());
            continue;
        }
        let Some(movie_id) = proposal.winner_movie_id.as_deref() else {
            not_ready.closed_without_winner.push(proposal.id.clone());
            continue;
        };
        if !votes.contains_key(movie_id) {
            let movie_votes = tx.load_movie_rating_votes(&round.id, movie_id).await?;
            votes.insert(movie_id.to_string(), movie_votes);
        }
        if votes.get(movie_id).is_none_or(|v| v.is_empty()) {
            not_ready.winner_without_votes.push(proposal.id.clone());
        }
    }

    if not_ready.is_empty() {
        Ok(Ok(votes))
    } else {
        Ok(Err(not_ready))
    }
}

// One outcome per distinct winner movie that has ratings, in proposal order.
fn proposal_outcomes<'a>(round: &'a Round, votes: &HashMap<String, Vec<RatingVote>>) -> Vec<Outcome<'a>> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut outcomes = Vec::new();
    for proposal in &round.proposals {
        let Some(movie_id) = proposal.winner_movie_id.as_deref() else {
            continue;
        };
        let Some(average) = votes.get(movie_id).and_then(|v| stats::movie_average(v)) else {
            warn!(
                "Skipping movie {} of proposal {}: no ratings in round {}",
                movie_id, proposal.id, round.id
            );
            continue;
        };
        if !seen.insert(movie_id) {
            warn!(
                "Movie {} already ranked in round {}, skipping proposal {}",
                movie_id, round.id, proposal.id
            );
            continue;
        }
        outcomes.push(Outcome {
            proposal,
            movie_id,
            average,
        });
    }
    outcomes
}
