use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use personapool_common::IssuerConfig;
use tokio::sync::Mutex;
use tracing::*;

use crate::issuer::CredentialIssuer;
use crate::pool::PersonaPool;

/// Per-sweep issuance tally. Skips and failures are ordinary outcomes;
/// the affected personas are retried on a later sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IssueSweepStats {
    pub issued: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Issue credentials for SESSION_REQUIRED personas and proactively renew
/// IDLE personas whose credential expires within the renewal buffer.
///
/// Processes at most `max_batch_size` personas per sweep with a pause
/// between issuer calls; the pool lock is never held across an issuer call.
pub async fn issue_credentials(
    pool: &Arc<Mutex<PersonaPool>>,
    issuer: &(dyn CredentialIssuer + Send + Sync),
    config: &IssuerConfig,
) -> IssueSweepStats {
    let targets: Vec<i64> = {
        let mut pool = pool.lock().await;
        let now = Utc::now();

        // Personas whose credential has already run out drop back to
        // SESSION_REQUIRED before the batch is assembled.
        for id in pool.expiring_credential_ids(now, Duration::ZERO) {
            let _ = pool.expire_credential(id);
        }

        let mut targets = pool.session_required_ids();
        targets.extend(pool.expiring_credential_ids(now, config.renewal_buffer));
        targets.truncate(config.max_batch_size);
        targets
    };

    if targets.is_empty() {
        return IssueSweepStats::default();
    }

    let mut stats = IssueSweepStats::default();
    let mut first = true;

    for id in targets {
        if !first {
            tokio::time::sleep(config.delay).await;
        }
        first = false;

        let Some(snapshot) = pool.lock().await.snapshot(id) else {
            stats.skipped += 1;
            continue;
        };

        match issuer.issue(&snapshot.fingerprint).await {
            Ok(Some(credential)) => match pool.lock().await.install_credential(id, credential) {
                Ok(true) => stats.issued += 1,
                Ok(false) | Err(_) => stats.skipped += 1,
            },
            Ok(None) => {
                debug!(persona_id = %id, "Issuer had no credential for persona");
                stats.skipped += 1;
            }
            Err(error) => {
                warn!(persona_id = %id, %error, "Credential issuance failed");
                stats.failed += 1;
            }
        }
    }

    info!(
        issued = stats.issued,
        skipped = stats.skipped,
        failed = stats.failed,
        "Credential issuance sweep complete"
    );
    stats
}
