use super::{fetch_round, Database};
use crate::error::StoreError;
use crate::models::{
    new_id, ExternalScores, LinkedRanking, Rating, RatingVote, Round, Score, UserRanking, UserRankingAverages,
};
use crate::rounds::gateway::{NewMovieRoundRanking, RoundGateway, RoundTransaction};
use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

#[async_trait]
impl RoundGateway for Database {
    async fn begin(&self) -> Result<Box<dyn RoundTransaction + '_>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteRoundTransaction { tx }))
    }
}

/// One round close against SQLite. Dropping it rolls back.
pub struct SqliteRoundTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn score(row: &SqliteRow, column: &str) -> Result<Option<Score>, StoreError> {
    let value: Option<f64> = row.try_get(column)?;
    Ok(value.map(Score::from_f64))
}

pub(crate) fn user_ranking_from_row(row: &SqliteRow) -> Result<UserRanking, StoreError> {
    Ok(UserRanking {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        group_id: row.try_get("group_id")?,
        averages: UserRankingAverages {
            average_rating: score(row, "average_rating")?,
            imdb_rating: score(row, "imdb_rating")?,
            vote_average: score(row, "vote_average")?,
            tomatometer: score(row, "tomatometer")?,
            metascore: score(row, "metascore")?,
        },
    })
}

#[async_trait]
impl RoundTransaction for SqliteRoundTransaction {
    async fn load_round(&mut self, round_id: &str) -> Result<Option<Round>, StoreError> {
        fetch_round(&mut self.tx, round_id).await
    }

    async fn load_movie_rating_votes(
        &mut self,
        round_id: &str,
        movie_id: &str,
    ) -> Result<Vec<RatingVote>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, rating
            FROM rating_votes
            WHERE round_id = ? AND movie_id = ?
            ORDER BY user_id
            "#,
        )
        .bind(round_id)
        .bind(movie_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RatingVote {
                    user_id: row.try_get("user_id")?,
                    round_id: round_id.to_string(),
                    movie_id: movie_id.to_string(),
                    rating: Rating::new(row.try_get("rating")?)?,
                })
            })
            .collect()
    }

    async fn create_movie_round_ranking(
        &mut self,
        ranking: &NewMovieRoundRanking,
    ) -> Result<String, StoreError> {
        let id = new_id();
        let (owner_user_id, owner_team_id) = super::owner_columns(&ranking.owner);
        let result = sqlx::query(
            r#"
            INSERT INTO movie_round_rankings
                (id, round_id, movie_id, owner_user_id, owner_team_id, average_rating, is_round_winner)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&ranking.round_id)
        .bind(&ranking.movie_id)
        .bind(owner_user_id)
        .bind(owner_team_id)
        .bind(ranking.average_rating.as_f64())
        .bind(ranking.is_round_winner)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict(format!(
                "movie {} already ranked in round {}",
                ranking.movie_id, ranking.round_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn link_votes_to_ranking(
        &mut self,
        round_id: &str,
        movie_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE rating_votes
            SET movie_round_ranking_id = ?
            WHERE round_id = ? AND movie_id = ?
            "#,
        )
        .bind(ranking_id)
        .bind(round_id)
        .bind(movie_id)
        .execute(&mut *self.tx)
        .await?;
        debug!("Linked {} votes to ranking {}", result.rows_affected(), ranking_id);
        Ok(())
    }

    async fn upsert_user_ranking(&mut self, user_id: &str, group_id: &str) -> Result<String, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_rankings (id, user_id, group_id)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, group_id) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(group_id)
        .execute(&mut *self.tx)
        .await?;

        let id = sqlx::query_scalar("SELECT id FROM user_rankings WHERE user_id = ? AND group_id = ?")
            .bind(user_id)
            .bind(group_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn link_ranking_to_user_ranking(
        &mut self,
        user_ranking_id: &str,
        ranking_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_ranking_links (user_ranking_id, movie_round_ranking_id)
            VALUES (?, ?)
            "#,
        )
        .bind(user_ranking_id)
        .bind(ranking_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn load_user_ranking_links(&mut self, user_ranking_id: &str) -> Result<Vec<LinkedRanking>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.average_rating, mv.imdb_rating, mv.vote_average, mv.tomatometer, mv.metascore
            FROM user_ranking_links l
            JOIN movie_round_rankings m ON m.id = l.movie_round_ranking_id
            LEFT JOIN movies mv ON mv.id = m.movie_id
            WHERE l.user_ranking_id = ?
            ORDER BY m.id
            "#,
        )
        .bind(user_ranking_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LinkedRanking {
                    ranking_id: row.try_get("id")?,
                    average_rating: score(&row, "average_rating")?,
                    scores: ExternalScores {
                        imdb_rating: row.try_get("imdb_rating")?,
                        vote_average: row.try_get("vote_average")?,
                        tomatometer: row.try_get("tomatometer")?,
                        metascore: row.try_get("metascore")?,
                    },
                })
            })
            .collect()
    }

    async fn update_user_ranking_averages(
        &mut self,
        user_ranking_id: &str,
        averages: &UserRankingAverages,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_rankings
            SET average_rating = ?, imdb_rating = ?, vote_average = ?, tomatometer = ?, metascore = ?
            WHERE id = ?
            "#,
        )
        .bind(averages.average_rating.map(Score::as_f64))
        .bind(averages.imdb_rating.map(Score::as_f64))
        .bind(averages.vote_average.map(Score::as_f64))
        .bind(averages.tomatometer.map(Score::as_f64))
        .bind(averages.metascore.map(Score::as_f64))
        .bind(user_ranking_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user ranking {}", user_ranking_id)));
        }
        Ok(())
    }

    async fn mark_round_closed(&mut self, round_id: &str, oscarable: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE rounds
            SET is_closed = TRUE, is_oscarable = ?
            WHERE id = ? AND is_closed = FALSE
            "#,
        )
        .bind(oscarable)
        .bind(round_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("round {} was closed concurrently", round_id)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
