// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{matches::MatchLocks, solo::SoloSessions, store::MatchStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: Vec<String>,
    pub failed: usize,
    pub solo_pruned: usize,
}

/// Deletes matches nobody has touched for longer than the inactivity
/// threshold. Sweeps run at most once per cadence and never overlap.
pub struct Reaper {
    store: Arc<dyn MatchStore>,
    locks: MatchLocks,
    solo: SoloSessions,
    cadence: chrono::Duration,
    threshold: chrono::Duration,
    last_swept_at: Mutex<Option<DateTime<Utc>>>,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn MatchStore>,
        locks: MatchLocks,
        solo: SoloSessions,
        cadence: chrono::Duration,
        threshold: chrono::Duration,
    ) -> Self {
        Self {
            store,
            locks,
            solo,
            cadence,
            threshold,
            last_swept_at: Mutex::new(None),
        }
    }

    /// Sweeps if the cadence has elapsed since the last sweep. Returns `None`
    /// when it is too early or another tick is already sweeping.
    pub async fn tick(&self, now: DateTime<Utc>) -> Option<SweepReport> {
        let Ok(mut last_swept_at) = self.last_swept_at.try_lock() else {
            debug!("sweep already in progress");
            return None;
        };
        if let Some(previous) = *last_swept_at
            && now.signed_duration_since(previous) < self.cadence
        {
            return None;
        }
        *last_swept_at = Some(now);
        Some(self.sweep(now, self.threshold).await)
    }

    pub async fn sweep(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = match self.store.list_ids().await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(error = %error, "failed to list matches for sweep");
                report.failed += 1;
                return report;
            }
        };

        for match_id in ids {
            report.scanned += 1;
            let lock = self.locks.lock_for(&match_id).await;
            {
                let _guard = lock.lock().await;
                match self.store.load(&match_id).await {
                    Ok(Some(record)) if record.is_stale(now, threshold) => {
                        match self.store.delete(&match_id).await {
                            Ok(_) => {
                                info!(
                                    match_id = %match_id,
                                    status = %record.status,
                                    last_activity = %record.last_activity,
                                    "reaped idle match"
                                );
                                report.deleted.push(match_id.clone());
                            }
                            Err(error) => {
                                warn!(match_id = %match_id, error = %error, "failed to delete idle match");
                                report.failed += 1;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(match_id = %match_id, error = %error, "failed to load match during sweep");
                        report.failed += 1;
                    }
                }
            }
            drop(lock);
            self.locks.forget(&match_id).await;
        }

        report.solo_pruned = self.solo.prune(now, threshold).await;
        if !report.deleted.is_empty() || report.solo_pruned > 0 {
            info!(
                scanned = report.scanned,
                deleted = report.deleted.len(),
                solo_pruned = report.solo_pruned,
                failed = report.failed,
                "sweep finished"
            );
        }
        report
    }
}
