use crate::db::Database;
use crate::error::CloseRoundError;
use crate::rounds::close_round;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::interval;

/// Periodically closes rounds whose end time has passed.
pub async fn check_due_rounds_task(database: Arc<Database>, check_interval_seconds: u64) {
    info!("Starting background task to close due rounds...");
    let mut interval = interval(StdDuration::from_secs(check_interval_seconds.max(1)));

    loop {
        interval.tick().await; // Wait for the next interval tick
        close_due_rounds(&database, Utc::now()).await;
    }
}

/// Attempts to close every open round that ended before `now`.
/// Returns how many were closed.
pub async fn close_due_rounds(database: &Database, now: DateTime<Utc>) -> usize {
    let due = match database.get_due_rounds(now).await {
        Ok(due) => due,
        Err(e) => {
            error!("Failed to query for due rounds: {}", e);
            return 0;
        }
    };
    if due.is_empty() {
        return 0;
    }
    info!("Found {} due round(s).", due.len());

    let mut closed = 0;
    for round_id in due {
        match close_round(database, &round_id).await {
            Ok(summary) => {
                closed += 1;
                info!(
                    "Closed due round {} with {} winner(s)",
                    round_id,
                    summary.winners().count()
                );
            }
            // Already reported by the closer; retried next tick.
            Err(CloseRoundError::NotReady(_)) => debug!("Round {} not ready, retrying later", round_id),
            Err(e) if e.is_retryable() => warn!("Closing round {} conflicted, will retry: {}", round_id, e),
            Err(e) => error!("Error closing due round {}: {}", round_id, e),
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProposalOwner, Rating, RatingVote, Round};

    #[tokio::test]
    async fn only_ready_due_rounds_are_closed() {
        let db = Database::connect("sqlite::memory:", 1).await.unwrap();

        let mut ready = Round::new("g1".to_string(), None);
        ready.ends_at = Some(Utc::now() - chrono::Duration::days(1));
        db.create_round(&ready).await.unwrap();
        let proposal = db
            .create_proposal(&ready.id, &ProposalOwner::User("u1".to_string()), &["m1".to_string()])
            .await
            .unwrap();
        db.close_proposal(&proposal.id, Some("m1")).await.unwrap();
        db.cast_rating_vote(&RatingVote {
            user_id: "u2".to_string(),
            round_id: ready.id.clone(),
            movie_id: "m1".to_string(),
            rating: Rating::new(4.5).unwrap(),
        })
        .await
        .unwrap();

        let mut blocked = Round::new("g1".to_string(), None);
        blocked.ends_at = Some(Utc::now() - chrono::Duration::days(1));
        db.create_round(&blocked).await.unwrap();
        db.create_proposal(&blocked.id, &ProposalOwner::User("u1".to_string()), &["m2".to_string()])
            .await
            .unwrap();

        assert_eq!(close_due_rounds(&db, Utc::now()).await, 1);
        assert!(db.get_round(&ready.id).await.unwrap().unwrap().is_closed);
        assert!(!db.get_round(&blocked.id).await.unwrap().unwrap().is_closed);

        // The blocked round stays due; the closed one does not come back.
        assert_eq!(db.get_due_rounds(Utc::now()).await.unwrap(), vec![blocked.id]);
    }
}
