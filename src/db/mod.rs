mod gateway;

use crate::config::Settings;
use crate::error::StoreError;
use crate::models::{
    new_id, Movie, MovieRoundRanking, Proposal, ProposalOwner, RatingVote, Round, Score, UserRanking,
};
use crate::voting::{self, ballot_from_json, ballot_from_ranks, SchulzeRanking};
use chrono::{DateTime, Utc};
use log::{info, warn};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite, SqliteConnection,
};
use std::collections::{HashMap, HashSet};

pub struct Database {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS movies (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        imdb_rating REAL,
        vote_average REAL,
        tomatometer REAL,
        metascore REAL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        name TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (team_id, user_id),
        FOREIGN KEY (team_id) REFERENCES teams(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rounds (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        ends_at TEXT,
        is_closed BOOLEAN NOT NULL DEFAULT FALSE,
        is_oscarable BOOLEAN NOT NULL DEFAULT FALSE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proposals (
        id TEXT PRIMARY KEY,
        round_id TEXT NOT NULL,
        owner_user_id TEXT,
        owner_team_id TEXT,
        is_closed BOOLEAN NOT NULL DEFAULT FALSE,
        winner_movie_id TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (round_id) REFERENCES rounds(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS proposal_movies (
        proposal_id TEXT NOT NULL,
        movie_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (proposal_id, movie_id),
        FOREIGN KEY (proposal_id) REFERENCES proposals(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ballots (
        proposal_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        ranks TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        PRIMARY KEY (proposal_id, user_id),
        FOREIGN KEY (proposal_id) REFERENCES proposals(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movie_round_rankings (
        id TEXT PRIMARY KEY,
        round_id TEXT NOT NULL,
        movie_id TEXT NOT NULL,
        owner_user_id TEXT,
        owner_team_id TEXT,
        average_rating REAL NOT NULL,
        is_round_winner BOOLEAN NOT NULL,
        UNIQUE (round_id, movie_id),
        FOREIGN KEY (round_id) REFERENCES rounds(id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rating_votes (
        user_id TEXT NOT NULL,
        round_id TEXT NOT NULL,
        movie_id TEXT NOT NULL,
        rating REAL NOT NULL,
        timestamp TEXT NOT NULL,
        movie_round_ranking_id TEXT,
        PRIMARY KEY (user_id, round_id, movie_id),
        FOREIGN KEY (round_id) REFERENCES rounds(id) ON DELETE CASCADE,
        FOREIGN KEY (movie_round_ranking_id) REFERENCES movie_round_rankings(id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_rankings (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        group_id TEXT NOT NULL,
        average_rating REAL,
        imdb_rating REAL,
        vote_average REAL,
        tomatometer REAL,
        metascore REAL,
        UNIQUE (user_id, group_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_ranking_links (
        user_ranking_id TEXT NOT NULL,
        movie_round_ranking_id TEXT NOT NULL,
        PRIMARY KEY (user_ranking_id, movie_round_ranking_id),
        FOREIGN KEY (user_ranking_id) REFERENCES user_rankings(id) ON DELETE CASCADE,
        FOREIGN KEY (movie_round_ranking_id) REFERENCES movie_round_rankings(id) ON DELETE CASCADE
    );
    "#,
];

impl Database {
    pub async fn new(settings: &Settings) -> Result<Self, StoreError> {
        Self::connect(&settings.database_url, settings.max_connections).await
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // In-memory databases live only as long as their connection
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(pool).await?;
        }
        Ok(())
    }

    pub async fn create_movie(&self, movie: &Movie) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO movies (id, title, imdb_rating, vote_average, tomatometer, metascore)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&movie.id)
        .bind(&movie.title)
        .bind(movie.scores.imdb_rating)
        .bind(movie.scores.vote_average)
        .bind(movie.scores.tomatometer)
        .bind(movie.scores.metascore)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Creates a team and returns its id.
    pub async fn create_team(&self, group_id: &str, name: &str, members: &[String]) -> Result<String, StoreError> {
        let team_id = new_id();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO teams (id, group_id, name) VALUES (?, ?, ?)")
            .bind(&team_id)
            .bind(group_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        for user_id in members {
            sqlx::query("INSERT OR IGNORE INTO team_members (team_id, user_id) VALUES (?, ?)")
                .bind(&team_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(team_id)
    }

    pub async fn create_round(&self, round: &Round) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rounds (id, group_id, created_at, ends_at, is_closed, is_oscarable)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&round.id)
        .bind(&round.group_id)
        .bind(round.created_at.to_rfc3339())
        .bind(round.ends_at.map(|dt| dt.to_rfc3339()))
        .bind(round.is_closed)
        .bind(round.is_oscarable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_round(&self, round_id: &str) -> Result<Option<Round>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_round(&mut conn, round_id).await
    }

    /// Adds an open proposal to a round. For a team owner, pass the team id;
    /// its members are read back from the database.
    pub async fn create_proposal(
        &self,
        round_id: &str,
        owner: &ProposalOwner,
        movie_ids: &[String],
    ) -> Result<Proposal, StoreError> {
        let proposal_id = new_id();
        let (owner_user_id, owner_team_id) = owner_columns(owner);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO proposals (id, round_id, owner_user_id, owner_team_id, is_closed, winner_movie_id, created_at)
            VALUES (?, ?, ?, ?, FALSE, NULL, ?)
            "#,
        )
        .bind(&proposal_id)
        .bind(round_id)
        .bind(owner_user_id)
        .bind(owner_team_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (i, movie_id) in movie_ids.iter().enumerate() {
            sqlx::query("INSERT INTO proposal_movies (proposal_id, movie_id, position) VALUES (?, ?, ?)")
                .bind(&proposal_id)
                .bind(movie_id)
                .bind(i as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let mut conn = self.pool.acquire().await?;
        fetch_proposals(&mut conn, round_id)
            .await?
            .into_iter()
            .find(|p| p.id == proposal_id)
            .ok_or_else(|| StoreError::NotFound(format!("proposal {}", proposal_id)))
    }

    /// Takes a movie off a proposal. Ballots that still mention it are kept
    /// and filtered when ranking.
    pub async fn remove_movie_from_proposal(&self, proposal_id: &str, movie_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM proposal_movies WHERE proposal_id = ? AND movie_id = ?")
            .bind(proposal_id)
            .bind(movie_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Closes a proposal, optionally designating its winning movie.
    pub async fn close_proposal(&self, proposal_id: &str, winner_movie_id: Option<&str>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE proposals
            SET is_closed = TRUE, winner_movie_id = ?
            WHERE id = ? AND is_closed = FALSE
            "#,
        )
        .bind(winner_movie_id)
        .bind(proposal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("proposal {} is missing or already closed", proposal_id)));
        }
        Ok(())
    }

    /// Stores a user's ranked ballot for a proposal, replacing any earlier one.
    pub async fn save_ballot(
        &self,
        proposal_id: &str,
        user_id: &str,
        ranks: &HashMap<String, Vec<String>>,
    ) -> Result<(), StoreError> {
        let live = self.proposal_movie_ids(proposal_id).await?;
        let live: HashSet<String> = live.into_iter().collect();
        // Reject malformed rank maps now rather than at ranking time
        ballot_from_ranks(ranks, &live)?;

        let ranks_json = serde_json::to_string(ranks).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO ballots (proposal_id, user_id, ranks, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(proposal_id, user_id)
            DO UPDATE SET ranks = excluded.ranks, timestamp = excluded.timestamp
            "#,
        )
        .bind(proposal_id)
        .bind(user_id)
        .bind(ranks_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Live Schulze ranking of a proposal's current movies.
    pub async fn proposal_standings(&self, proposal_id: &str) -> Result<SchulzeRanking<String>, StoreError> {
        let movie_ids = self.proposal_movie_ids(proposal_id).await?;
        let live: HashSet<String> = movie_ids.iter().cloned().collect();

        let rows = sqlx::query("SELECT user_id, ranks FROM ballots WHERE proposal_id = ? ORDER BY user_id")
            .bind(proposal_id)
            .fetch_all(&self.pool)
            .await?;

        let mut ballots = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id: String = row.try_get("user_id")?;
            let ranks: String = row.try_get("ranks")?;
            match ballot_from_json(&ranks, &live) {
                Ok(ballot) => ballots.push(ballot),
                Err(e) => warn!("Skipping ballot of {} on proposal {}: {}", user_id, proposal_id, e),
            }
        }

        Ok(voting::rank(&movie_ids, &ballots))
    }

    /// Records (or replaces) a user's rating of a movie in an open round.
    pub async fn cast_rating_vote(&self, vote: &RatingVote) -> Result<(), StoreError> {
        let is_closed: Option<bool> = sqlx::query_scalar("SELECT is_closed FROM rounds WHERE id = ?")
            .bind(&vote.round_id)
            .fetch_optional(&self.pool)
            .await?;
        match is_closed {
            None => return Err(StoreError::NotFound(format!("round {}", vote.round_id))),
            Some(true) => return Err(StoreError::Conflict(format!("round {} is closed", vote.round_id))),
            Some(false) => {}
        }

        sqlx::query(
            r#"
            INSERT INTO rating_votes (user_id, round_id, movie_id, rating, timestamp)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, round_id, movie_id)
            DO UPDATE SET rating = excluded.rating, timestamp = excluded.timestamp
            "#,
        )
        .bind(&vote.user_id)
        .bind(&vote.round_id)
        .bind(&vote.movie_id)
        .bind(vote.rating.as_f64())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Get open rounds that have passed their end time
    pub async fn get_due_rounds(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM rounds
            WHERE ends_at IS NOT NULL AND ends_at < ? AND is_closed = FALSE
            ORDER BY ends_at
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(StoreError::from))
            .collect()
    }

    pub async fn get_movie_round_rankings(&self, round_id: &str) -> Result<Vec<MovieRoundRanking>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, round_id, movie_id, owner_user_id, owner_team_id, average_rating, is_round_winner
            FROM movie_round_rankings
            WHERE round_id = ?
            ORDER BY average_rating DESC, movie_id
            "#,
        )
        .bind(round_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut rankings = Vec::with_capacity(rows.len());
        for row in rows {
            let owner = read_owner(
                &mut conn,
                row.try_get("owner_user_id")?,
                row.try_get("owner_team_id")?,
            )
            .await?;
            rankings.push(MovieRoundRanking {
                id: row.try_get("id")?,
                round_id: row.try_get("round_id")?,
                movie_id: row.try_get("movie_id")?,
                owner,
                average_rating: Score::from_f64(row.try_get("average_rating")?),
                is_round_winner: row.try_get("is_round_winner")?,
            });
        }
        Ok(rankings)
    }

    pub async fn get_user_ranking(&self, user_id: &str, group_id: &str) -> Result<Option<UserRanking>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, group_id, average_rating, imdb_rating, vote_average, tomatometer, metascore
            FROM user_rankings
            WHERE user_id = ? AND group_id = ?
            "#,
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| gateway::user_ranking_from_row(&row)).transpose()
    }

    async fn proposal_movie_ids(&self, proposal_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT movie_id FROM proposal_movies WHERE proposal_id = ? ORDER BY position")
            .bind(proposal_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("movie_id").map_err(StoreError::from))
            .collect()
    }
}

fn owner_columns(owner: &ProposalOwner) -> (Option<&str>, Option<&str>) {
    match owner {
        ProposalOwner::User(user_id) => (Some(user_id.as_str()), None),
        ProposalOwner::Team { id, .. } => (None, Some(id.as_str())),
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Failed to parse {}: {}", column, e)))
}

async fn read_owner(
    conn: &mut SqliteConnection,
    owner_user_id: Option<String>,
    owner_team_id: Option<String>,
) -> Result<ProposalOwner, StoreError> {
    match (owner_user_id, owner_team_id) {
        (Some(user_id), None) => Ok(ProposalOwner::User(user_id)),
        (None, Some(team_id)) => {
            let members = sqlx::query_scalar("SELECT user_id FROM team_members WHERE team_id = ? ORDER BY user_id")
                .bind(&team_id)
                .fetch_all(&mut *conn)
                .await?;
            Ok(ProposalOwner::Team { id: team_id, members })
        }
        _ => Err(StoreError::Corrupt("owner must be exactly one of user or team".to_string())),
    }
}

async fn fetch_round(conn: &mut SqliteConnection, round_id: &str) -> Result<Option<Round>, StoreError> {
    let Some(row) = sqlx::query(
        r#"
        SELECT id, group_id, created_at, ends_at, is_closed, is_oscarable
        FROM rounds
        WHERE id = ?
        "#,
    )
    .bind(round_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let created_at: String = row.try_get("created_at")?;
    let ends_at: Option<String> = row.try_get("ends_at")?;
    let proposals = fetch_proposals(conn, round_id).await?;

    Ok(Some(Round {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        ends_at: ends_at.as_deref().map(|s| parse_timestamp("ends_at", s)).transpose()?,
        is_closed: row.try_get("is_closed")?,
        is_oscarable: row.try_get("is_oscarable")?,
        proposals,
    }))
}

async fn fetch_proposals(conn: &mut SqliteConnection, round_id: &str) -> Result<Vec<Proposal>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, round_id, owner_user_id, owner_team_id, is_closed, winner_movie_id
        FROM proposals
        WHERE round_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(round_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut proposals = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id")?;
        let owner = read_owner(conn, row.try_get("owner_user_id")?, row.try_get("owner_team_id")?).await?;
        let movie_ids = sqlx::query_scalar("SELECT movie_id FROM proposal_movies WHERE proposal_id = ? ORDER BY position")
            .bind(&id)
            .fetch_all(&mut *conn)
            .await?;
        proposals.push(Proposal {
            id,
            round_id: row.try_get("round_id")?,
            owner,
            movie_ids,
            is_closed: row.try_get("is_closed")?,
            winner_movie_id: row.try_get("winner_movie_id")?,
        });
    }
    Ok(proposals)
}
