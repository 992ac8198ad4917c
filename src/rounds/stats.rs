use crate::models::{ExternalScores, LinkedRanking, RatingVote, Score, UserRankingAverages};

/// Mean rating of a movie's votes, to two decimals. `None` without votes.
pub fn movie_average(votes: &[RatingVote]) -> Option<Score> {
    Score::mean_of_cents(votes.iter().map(|v| v.rating.cents()), 1)
}

/// Highest average among the round's movies.
pub fn winning_average<'a, I>(averages: I) -> Option<Score>
where
    I: IntoIterator<Item = &'a Score>,
{
    averages.into_iter().copied().max()
}

/// Rebuilds a user's statistics from the full set of rankings linked to them.
///
/// External scores are halved onto the 0..=5 scale and averaged only over
/// movies that carry that score.
pub fn recompute_user_ranking(links: &[LinkedRanking]) -> UserRankingAverages {
    if links.is_empty() {
        return UserRankingAverages::default();
    }

    UserRankingAverages {
        average_rating: Score::mean_of_cents(
            links.iter().filter_map(|l| l.average_rating).map(Score::cents),
            1,
        ),
        imdb_rating: external_average(links, |s| s.imdb_rating),
        vote_average: external_average(links, |s| s.vote_average),
        tomatometer: external_average(links, |s| s.tomatometer),
        metascore: external_average(links, |s| s.metascore),
    }
}

fn external_average(links: &[LinkedRanking], pick: fn(&ExternalScores) -> Option<f64>) -> Option<Score> {
    // Sources share a 0..=10 scale; dividing by 2 lands on 0..=5.
    Score::mean_of_cents(
        links
            .iter()
            .filter_map(|l| pick(&l.scores))
            .map(|v| Score::from_f64(v).cents()),
        2,
    )
}
