//! Result recorder: turns finished sessions into match rows

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::game::FinishedMatch;
use crate::store::{MatchId, NewMatch, Round, Storage, StoreError, TournamentId};
use crate::util::time::unix_millis;

use super::MatchObserver;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Tournament {tournament_id} round {round:?} already recorded")]
    AlreadyRecorded {
        tournament_id: TournamentId,
        round: Round,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Match {match_id} stored but bracket update failed: {message}")]
    Observer { match_id: MatchId, message: String },
}

pub struct ResultRecorder {
    store: Arc<dyn Storage>,
    observer: Arc<dyn MatchObserver>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn Storage>, observer: Arc<dyn MatchObserver>) -> Self {
        Self { store, observer }
    }

    /// Write the match row and, for bracket matches, advance the tournament
    pub async fn record(&self, finished: &FinishedMatch) -> Result<MatchId, RecordError> {
        if let Some(match_ref) = finished.tournament {
            if self
                .store
                .find_round_match(match_ref.tournament_id, match_ref.round)
                .await?
                .is_some()
            {
                return Err(RecordError::AlreadyRecorded {
                    tournament_id: match_ref.tournament_id,
                    round: match_ref.round,
                });
            }
        }

        let record = self
            .store
            .insert_match(NewMatch {
                tournament_id: finished.tournament.map(|t| t.tournament_id),
                player1: finished.player1,
                player2: finished.player2,
                score_player1: finished.score_player1,
                score_player2: finished.score_player2,
                winner_id: finished.winner_id,
                round: finished.tournament.map(|t| t.round),
                created_at: unix_millis() as i64,
            })
            .await?;

        info!(
            match_id = record.id,
            session_id = %finished.session_id,
            winner_id = record.winner_id,
            forfeit = finished.forfeit,
            "Match recorded"
        );

        if record.tournament_id.is_some() {
            self.observer
                .on_match_recorded(&record)
                .await
                .map_err(|err| RecordError::Observer {
                    match_id: record.id,
                    message: format!("{:#}", err),
                })?;
        }

        Ok(record.id)
    }

    /// Record every finished match, each on its own task
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<FinishedMatch>) {
        info!("Result recorder started");

        while let Some(finished) = receiver.recv().await {
            let recorder = self.clone();
            tokio::spawn(async move {
                match recorder.record(&finished).await {
                    Ok(_) => {}
                    Err(err @ RecordError::AlreadyRecorded { .. }) => {
                        warn!(session_id = %finished.session_id, error = %err, "Duplicate result ignored");
                    }
                    Err(err) => {
                        error!(
                            session_id = %finished.session_id,
                            error = %err,
                            payload = ?finished,
                            "Failed to record match, needs manual reconciliation"
                        );
                    }
                }
            });
        }

        info!("Result recorder stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::game::TournamentMatchRef;
    use crate::store::{MatchRecord, MemoryStore};

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<MatchRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl MatchObserver for Collecting {
        async fn on_match_recorded(&self, record: &MatchRecord) -> anyhow::Result<()> {
            self.seen.lock().push(record.clone());
            if self.fail {
                anyhow::bail!("bracket unavailable");
            }
            Ok(())
        }
    }

    fn finished(tournament: Option<TournamentMatchRef>) -> FinishedMatch {
        FinishedMatch {
            session_id: Uuid::new_v4(),
            tournament,
            player1: 10,
            player2: 11,
            score_player1: 5,
            score_player2: 2,
            winner_id: 10,
            forfeit: false,
        }
    }

    fn semi() -> Option<TournamentMatchRef> {
        Some(TournamentMatchRef {
            tournament_id: 1,
            round: Round::Semi1,
        })
    }

    #[tokio::test]
    async fn free_play_match_is_stored_without_notification() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(Collecting::default());
        let recorder = ResultRecorder::new(store.clone(), observer.clone());

        recorder.record(&finished(None)).await.unwrap();

        let rows = store.matches();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tournament_id, None);
        assert_eq!(rows[0].round, None);
        assert!(observer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn tournament_round_is_recorded_once() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(Collecting::default());
        let recorder = ResultRecorder::new(store.clone(), observer.clone());

        let id = recorder.record(&finished(semi())).await.unwrap();
        let again = recorder.record(&finished(semi())).await;

        assert!(matches!(again, Err(RecordError::AlreadyRecorded { tournament_id: 1, .. })));
        assert_eq!(store.matches().len(), 1);
        let seen = observer.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, id);
        assert_eq!(seen[0].round, Some(Round::Semi1));
    }

    #[tokio::test]
    async fn observer_failure_keeps_the_row() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(Collecting {
            fail: true,
            ..Default::default()
        });
        let recorder = ResultRecorder::new(store.clone(), observer);

        let err = recorder.record(&finished(semi())).await.unwrap_err();
        assert!(matches!(err, RecordError::Observer { .. }));
        assert_eq!(store.matches().len(), 1);
    }

    #[tokio::test]
    async fn run_drains_the_channel() {
        let store = Arc::new(MemoryStore::new());
        let observer = Arc::new(Collecting::default());
        let recorder = Arc::new(ResultRecorder::new(store.clone(), observer));
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(recorder.run(rx));
        tx.send(finished(None)).unwrap();
        tx.send(finished(None)).unwrap();
        drop(tx);
        task.await.unwrap();

        for _ in 0..50 {
            if store.matches().len() == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("matches not recorded");
    }
}
