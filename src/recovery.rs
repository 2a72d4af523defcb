//! Startup recovery: rebuild pending jobs from the queue directory.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::RecoveryPolicy;
use crate::error::{Error, Result};
use crate::model::JobRecord;
use crate::store::JobStore;
use crate::telemetry::metrics;

/// What recovery found on disk.
#[derive(Debug, Default)]
pub struct Recovered {
    /// Loaded jobs, ordered by due time then creation time.
    pub jobs: Vec<JobRecord>,
    /// Corrupt files renamed out of the way under [`RecoveryPolicy::Quarantine`].
    pub quarantined: Vec<PathBuf>,
}

/// Load every active job file with at most `concurrency` reads in flight.
///
/// Loaded jobs come back with `processing = false`: whatever was running when
/// the previous process stopped is pending again.
pub async fn recover(
    store: &JobStore,
    concurrency: usize,
    policy: RecoveryPolicy,
) -> Result<Recovered> {
    let paths = store.scan().await?;
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut loads = JoinSet::new();

    for path in paths {
        let store = store.clone();
        let permits = Arc::clone(&permits);
        loads.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let loaded = store.load(&path).await;
            (path, loaded)
        });
    }

    let mut recovered = Recovered::default();
    while let Some(joined) = loads.join_next().await {
        let (path, loaded) = joined.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        match loaded {
            Ok(mut job) => {
                job.processing = false;
                recovered.jobs.push(job);
            }
            Err(e @ Error::Deserialize { .. }) if policy == RecoveryPolicy::Quarantine => {
                warn!(error = %e, "quarantining corrupt job file");
                recovered.quarantined.push(store.quarantine(&path).await?);
            }
            Err(e) => {
                loads.abort_all();
                return Err(e);
            }
        }
    }

    recovered.jobs.sort_by_key(|j| (j.due_at, j.created_at));
    metrics::jobs_recovered().add(recovered.jobs.len() as u64, &[]);
    info!(
        dir = %store.dir().display(),
        jobs = recovered.jobs.len(),
        quarantined = recovered.quarantined.len(),
        "recovery complete"
    );
    Ok(recovered)
}
