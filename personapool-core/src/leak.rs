use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use personapool_common::RequestOutcome;
use tokio::sync::Mutex;
use tracing::*;

use crate::persona::ReturnDisposition;
use crate::pool::PersonaPool;

/// Reclaim leases held past the threshold (abandoned by crashed or hung
/// callers) by forcing a failure return for each. A persona that slipped
/// out of BORROWED between detection and reclamation is skipped; one bad
/// persona never aborts the sweep. Returns the number reclaimed.
pub async fn reclaim_leaked(pool: &Arc<Mutex<PersonaPool>>, threshold: Duration) -> usize {
    let now = Utc::now();
    let leaked = { pool.lock().await.detect_leaked(threshold, now) };

    if leaked.is_empty() {
        return 0;
    }

    warn!(personas = leaked.len(), "Detected leaked persona leases");

    let mut reclaimed = 0;
    for id in leaked {
        let disposition =
            pool.lock()
                .await
                .return_persona(id, RequestOutcome::failure(0), Utc::now());
        match disposition {
            ReturnDisposition::NotBorrowed => {
                warn!(persona_id = %id, "Leaked persona was already returned, skipping");
            }
            disposition => {
                info!(persona_id = %id, ?disposition, "Reclaimed leaked persona");
                reclaimed += 1;
            }
        }
    }

    reclaimed
}
