use crate::error::RatingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Hundredths on the 0..=5 rating scale.
const MAX_RATING_CENTS: i64 = 500;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A two-decimal fixed-point value, stored as hundredths.
///
/// Averages are kept in this form so that "equal to the winning average"
/// is an integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score(i64);

impl Score {
    pub const fn from_cents(cents: i64) -> Self {
        Score(cents)
    }

    /// Nearest hundredth of `value`. Used when reading decimals back from storage.
    pub fn from_f64(value: f64) -> Self {
        Score((value * 100.0).round() as i64)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Mean of hundredths values divided by `divisor`, rounded half-up to the
    /// nearest hundredth. `None` for an empty input.
    pub fn mean_of_cents<I>(cents: I, divisor: i64) -> Option<Score>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut sum = 0i64;
        let mut count = 0i64;
        for c in cents {
            sum += c;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let denom = count * divisor;
        // Values are never negative on these scales, so floor((2s + d) / 2d) is half-up.
        Some(Score((2 * sum + denom).div_euclid(2 * denom)))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// A validated rating on the closed 0..=5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Rating(Score);

impl Rating {
    pub fn new(value: f64) -> Result<Self, RatingError> {
        if !value.is_finite() {
            return Err(RatingError::NotFinite);
        }
        let cents = (value * 100.0).round() as i64;
        if value < 0.0 || cents > MAX_RATING_CENTS || value > 5.0 {
            return Err(RatingError::OutOfRange(value));
        }
        Ok(Rating(Score(cents)))
    }

    pub fn cents(self) -> i64 {
        self.0.cents()
    }

    pub fn as_f64(self) -> f64 {
        self.0.as_f64()
    }
}

impl TryFrom<f64> for Rating {
    type Error = RatingError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Rating::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Third-party quality scores as stored on a movie.
///
/// `tomatometer` and `metascore` are stored already divided by 10, so all
/// four share a 0..=10 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalScores {
    pub imdb_rating: Option<f64>,
    pub vote_average: Option<f64>,
    pub tomatometer: Option<f64>,
    pub metascore: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub scores: ExternalScores,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalOwner {
    User(String),
    Team { id: String, members: Vec<String> },
}

impl ProposalOwner {
    /// Users credited with a proposal's outcome.
    pub fn users(&self) -> Vec<String> {
        match self {
            ProposalOwner::User(user_id) => vec![user_id.clone()],
            ProposalOwner::Team { members, .. } => members.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub round_id: String,
    pub owner: ProposalOwner,
    pub movie_ids: Vec<String>,
    pub is_closed: bool,
    pub winner_movie_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub group_id: String,
    pub created_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_closed: bool,
    pub is_oscarable: bool,
    pub proposals: Vec<Proposal>,
}

impl Round {
    pub fn new(group_id: String, duration_days: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            group_id,
            created_at: now,
            ends_at: duration_days.map(|days| now + chrono::Duration::days(days)),
            is_closed: false,
            is_oscarable: false,
            proposals: Vec::new(),
        }
    }
}

/// One user's rating of a movie within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingVote {
    pub user_id: String,
    pub round_id: String,
    pub movie_id: String,
    pub rating: Rating,
}

/// Outcome record for one movie in one closed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRoundRanking {
    pub id: String,
    pub round_id: String,
    pub movie_id: String,
    pub owner: ProposalOwner,
    pub average_rating: Score,
    pub is_round_winner: bool,
}

/// A ranking record linked to a user ranking, with its movie's external scores.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedRanking {
    pub ranking_id: String,
    pub average_rating: Option<Score>,
    pub scores: ExternalScores,
}

/// Derived per-user statistics; every field is `None` until a ranking is linked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRankingAverages {
    pub average_rating: Option<Score>,
    pub imdb_rating: Option<Score>,
    pub vote_average: Option<Score>,
    pub tomatometer: Option<Score>,
    pub metascore: Option<Score>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRanking {
    pub id: String,
    pub user_id: String,
    pub group_id: String,
    pub averages: UserRankingAverages,
}
