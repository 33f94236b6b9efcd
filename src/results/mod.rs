//! Persistence of finished matches

pub mod recorder;

use async_trait::async_trait;

use crate::store::MatchRecord;

pub use recorder::{RecordError, ResultRecorder};

/// Notified after a tournament match row has been written
#[async_trait]
pub trait MatchObserver: Send + Sync {
    async fn on_match_recorded(&self, record: &MatchRecord) -> anyhow::Result<()>;
}
