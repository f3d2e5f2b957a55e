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

use std::{collections::HashMap, sync::Arc};

use armada_common::{
    AbandonResponse, Cell, JoinMatchResponse, MatchError, MatchRecord, MatchStateView,
    MatchStatus, MatchSummary, Placement, PlacementResponse, Rules, ShotReport, Slot,
    SubmitPlacementResponse, generate_match_id, is_valid_match_id,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::{MatchStore, StoreError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Per-match critical sections. Operations on different ids never contend.
#[derive(Clone, Default)]
pub struct MatchLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MatchLocks {
    pub async fn lock_for(&self, match_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the entry for `match_id` unless someone still holds or waits on it.
    pub async fn forget(&self, match_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(match_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(match_id);
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl From<StoreError> for MatchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Missing(match_id) => MatchError::NotFound(format!("match {match_id}")),
            other => MatchError::StorageUnavailable(other.to_string()),
        }
    }
}

/// Result of applying a change to a loaded record.
enum Mutation<T> {
    Changed(T),
    Unchanged(T),
}

#[derive(Clone)]
pub struct MatchService {
    store: Arc<dyn MatchStore>,
    locks: MatchLocks,
    rules: Arc<Rules>,
    clock: Arc<dyn Clock>,
    save_attempts: u32,
}

impl MatchService {
    pub fn new(
        store: Arc<dyn MatchStore>,
        locks: MatchLocks,
        rules: Arc<Rules>,
        clock: Arc<dyn Clock>,
        save_attempts: u32,
    ) -> Self {
        Self {
            store,
            locks,
            rules,
            clock,
            save_attempts: save_attempts.max(1),
        }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Load, apply and save `match_id` under its lock. A version conflict
    /// reloads and applies again; a record deleted underneath is `NotFound`.
    async fn mutate<T, F>(&self, match_id: &str, mut apply: F) -> Result<T, MatchError>
    where
        F: FnMut(&mut MatchRecord, DateTime<Utc>) -> Result<Mutation<T>, MatchError>,
    {
        if !is_valid_match_id(match_id) {
            return Err(MatchError::NotFound(format!("match {match_id}")));
        }
        let lock = self.locks.lock_for(match_id).await;
        let _guard = lock.lock().await;

        for attempt in 1..=self.save_attempts {
            let mut record = self
                .store
                .load(match_id)
                .await?
                .ok_or_else(|| MatchError::NotFound(format!("match {match_id}")))?;
            let expected = record.version;
            let value = match apply(&mut record, self.clock.now())? {
                Mutation::Unchanged(value) => return Ok(value),
                Mutation::Changed(value) => value,
            };
            record.version = expected + 1;
            match self.store.save(&record, expected).await {
                Ok(()) => return Ok(value),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(match_id = %match_id, attempt, "match changed underneath; retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        warn!(match_id = %match_id, attempts = self.save_attempts, "giving up on contended match");
        Err(MatchError::StorageUnavailable(format!(
            "match {match_id} kept changing; gave up after {} attempts",
            self.save_attempts
        )))
    }

    async fn load(&self, match_id: &str) -> Result<MatchRecord, MatchError> {
        if !is_valid_match_id(match_id) {
            return Err(MatchError::NotFound(format!("match {match_id}")));
        }
        self.store
            .load(match_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("match {match_id}")))
    }

    /// Puts the caller into a match: the remembered one if it is still live,
    /// else the oldest match waiting for a second player (slot 2 only), else a
    /// brand new one.
    pub async fn join(
        &self,
        prior_match_id: Option<&str>,
        slot: Slot,
    ) -> Result<JoinMatchResponse, MatchError> {
        if let Some(prior) = prior_match_id.map(str::trim).filter(|id| !id.is_empty()) {
            let rejoined = self
                .mutate(prior, |record, now| {
                    if record.status.is_terminal() {
                        return Ok(Mutation::Unchanged(None));
                    }
                    record.register(slot);
                    record.touch(now);
                    Ok(Mutation::Changed(Some(record.status)))
                })
                .await;
            match rejoined {
                Ok(Some(status)) => {
                    info!(match_id = %prior, slot = %slot, "player rejoined match");
                    return Ok(JoinMatchResponse {
                        match_id: prior.to_string(),
                        slot,
                        status,
                        created: false,
                    });
                }
                Ok(None) | Err(MatchError::NotFound(_)) => {
                    debug!(match_id = %prior, "prior match is gone or finished");
                }
                Err(error) => return Err(error),
            }
        }

        if slot == Slot::Two {
            for candidate in self.open_matches().await? {
                let joined = self
                    .mutate(&candidate, |record, now| {
                        if !record.is_open_for_second_player() {
                            return Ok(Mutation::Unchanged(false));
                        }
                        record.register(Slot::Two);
                        record.touch(now);
                        Ok(Mutation::Changed(true))
                    })
                    .await;
                match joined {
                    Ok(true) => {
                        info!(match_id = %candidate, slot = %slot, "player joined waiting match");
                        return Ok(JoinMatchResponse {
                            match_id: candidate,
                            slot,
                            status: MatchStatus::Waiting,
                            created: false,
                        });
                    }
                    Ok(false) | Err(MatchError::NotFound(_)) => {}
                    Err(error) => return Err(error),
                }
            }
        }

        self.create(slot).await
    }

    async fn create(&self, slot: Slot) -> Result<JoinMatchResponse, MatchError> {
        for _ in 0..self.save_attempts {
            let match_id = generate_match_id(&mut rand::rng());
            let record = MatchRecord::new(match_id.clone(), slot, self.clock.now());
            match self.store.create(&record).await {
                Ok(()) => {
                    info!(match_id = %match_id, slot = %slot, "match created");
                    return Ok(JoinMatchResponse {
                        match_id,
                        slot,
                        status: record.status,
                        created: true,
                    });
                }
                Err(StoreError::AlreadyExists(_)) => {
                    debug!(match_id = %match_id, "match id collision; drawing another");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Err(MatchError::StorageUnavailable(
            "could not allocate a free match id".to_string(),
        ))
    }

    /// Every stored record, oldest first. Records that fail to load are skipped.
    async fn all_records(&self) -> Result<Vec<MatchRecord>, MatchError> {
        let mut records = Vec::new();
        for match_id in self.store.list_ids().await? {
            match self.store.load(&match_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(error) => {
                    warn!(match_id = %match_id, error = %error, "skipping unreadable match");
                }
            }
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.match_id.cmp(&b.match_id))
        });
        Ok(records)
    }

    async fn open_matches(&self) -> Result<Vec<String>, MatchError> {
        Ok(self
            .all_records()
            .await?
            .into_iter()
            .filter(MatchRecord::is_open_for_second_player)
            .map(|record| record.match_id)
            .collect())
    }

    pub async fn submit_placement(
        &self,
        match_id: &str,
        slot: Slot,
        placement: Placement,
    ) -> Result<SubmitPlacementResponse, MatchError> {
        let (status, both_ready) = self
            .mutate(match_id, |record, now| {
                let started = record.submit_placement(&self.rules, slot, placement.clone(), now)?;
                Ok(Mutation::Changed((record.status, started)))
            })
            .await?;
        info!(match_id = %match_id, slot = %slot, both_ready, "placement accepted");
        Ok(SubmitPlacementResponse {
            match_id: match_id.to_string(),
            status,
            both_ready,
        })
    }

    pub async fn get_placement(
        &self,
        match_id: &str,
        slot: Slot,
    ) -> Result<PlacementResponse, MatchError> {
        let placement = self
            .mutate(match_id, |record, now| {
                let placement = record.placement_of(slot)?.clone();
                record.touch(now);
                Ok(Mutation::Changed(placement))
            })
            .await?;
        Ok(PlacementResponse {
            match_id: match_id.to_string(),
            slot,
            placement,
        })
    }

    pub async fn get_state(&self, match_id: &str, slot: Slot) -> Result<MatchStateView, MatchError> {
        self.mutate(match_id, |record, now| {
            let view = record.state_view(slot)?;
            record.touch(now);
            Ok(Mutation::Changed(view))
        })
        .await
    }

    pub async fn fire_shot(
        &self,
        match_id: &str,
        slot: Slot,
        cell: Cell,
    ) -> Result<ShotReport, MatchError> {
        let report = self
            .mutate(match_id, |record, now| {
                record.fire_shot(slot, cell, now).map(Mutation::Changed)
            })
            .await?;
        info!(
            match_id = %match_id,
            slot = %slot,
            row = cell.row,
            col = cell.col,
            hit = report.hit,
            game_over = report.game_over,
            "shot resolved"
        );
        Ok(report)
    }

    pub async fn abandon(&self, match_id: &str, slot: Slot) -> Result<AbandonResponse, MatchError> {
        let status = self
            .mutate(match_id, |record, now| {
                let before = record.status;
                let status = record.abandon(slot, now)?;
                Ok(if status == before {
                    Mutation::Unchanged(status)
                } else {
                    Mutation::Changed(status)
                })
            })
            .await?;
        info!(match_id = %match_id, slot = %slot, status = %status, "match abandoned");
        Ok(AbandonResponse {
            match_id: match_id.to_string(),
            status,
        })
    }

    pub async fn summaries(&self) -> Result<Vec<MatchSummary>, MatchError> {
        Ok(self
            .all_records()
            .await?
            .iter()
            .map(MatchRecord::summary)
            .collect())
    }

    pub async fn record(&self, match_id: &str) -> Result<MatchRecord, MatchError> {
        self.load(match_id).await
    }
}

#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
