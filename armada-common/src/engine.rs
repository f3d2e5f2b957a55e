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

//! Match state transitions. Everything here works on an in-memory
//! [`MatchRecord`]; persistence and locking belong to the caller.
//! A failed transition leaves the record untouched.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::{
    Cell, MatchError, MatchRecord, MatchStateView, MatchStatus, PerSlot, Placement, Rules,
    ShotOutcome, ShotRecord, ShotReport, Slot, StatsView, check_placement,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotResolution {
    pub record: ShotRecord,
    pub sunk_ship: Option<String>,
    pub fleet_destroyed: bool,
}

/// Resolves a shot at `cell` against `target`, given the shooter's earlier
/// history. Cells outside every ship (including off-grid cells) are misses.
pub fn resolve_shot(target: &Placement, history: &[ShotRecord], cell: Cell) -> ShotResolution {
    let Some(ship) = target.ship_at(cell).map(str::to_string) else {
        return ShotResolution {
            record: ShotRecord {
                cell,
                outcome: ShotOutcome::Miss,
                ship: None,
            },
            sunk_ship: None,
            fleet_destroyed: false,
        };
    };

    let mut hits: HashSet<Cell> = history
        .iter()
        .filter(|shot| shot.is_hit())
        .map(|shot| shot.cell)
        .collect();
    hits.insert(cell);

    let sunk = target
        .get(&ship)
        .is_some_and(|cells| cells.iter().all(|c| hits.contains(c)));
    let fleet_destroyed = target.cells().all(|c| hits.contains(&c));

    ShotResolution {
        record: ShotRecord {
            cell,
            outcome: ShotOutcome::Hit,
            ship: Some(ship.clone()),
        },
        sunk_ship: sunk.then_some(ship),
        fleet_destroyed,
    }
}

impl MatchRecord {
    fn ensure_participant(&self, slot: Slot) -> Result<(), MatchError> {
        if self.has_participant(slot) {
            Ok(())
        } else {
            Err(MatchError::InvalidSession(format!(
                "slot {slot} has not joined match {}",
                self.match_id
            )))
        }
    }

    /// Records `slot`'s fleet and marks it ready. Returns true when this
    /// submission started play.
    pub fn submit_placement(
        &mut self,
        rules: &Rules,
        slot: Slot,
        placement: Placement,
        now: DateTime<Utc>,
    ) -> Result<bool, MatchError> {
        self.ensure_participant(slot)?;
        match self.status {
            MatchStatus::Waiting => {}
            MatchStatus::Playing => return Err(MatchError::PlacementLocked),
            status => return Err(MatchError::GameNotPlaying(status)),
        }
        check_placement(rules, &placement)?;

        *self.placements.get_mut(slot) = Some(placement);
        if let Some(participant) = self.participants.get_mut(slot).as_mut() {
            participant.ready = true;
        }
        self.touch(now);
        Ok(self.try_start())
    }

    fn try_start(&mut self) -> bool {
        let ready = Slot::ALL.iter().all(|&slot| {
            self.participants.get(slot).is_some_and(|p| p.ready)
                && self.placements.get(slot).is_some()
        });
        if !ready {
            return false;
        }
        self.status = MatchStatus::Playing;
        self.current_turn = Some(Slot::One);
        self.stats = PerSlot::default();
        true
    }

    pub fn fire_shot(
        &mut self,
        slot: Slot,
        cell: Cell,
        now: DateTime<Utc>,
    ) -> Result<ShotReport, MatchError> {
        self.ensure_participant(slot)?;
        if self.status != MatchStatus::Playing {
            return Err(MatchError::GameNotPlaying(self.status));
        }
        if self.current_turn != Some(slot) {
            return Err(MatchError::NotYourTurn);
        }
        if self.shots.get(slot).iter().any(|shot| shot.cell == cell) {
            return Err(MatchError::DuplicateShot(cell));
        }
        let target = self
            .placements
            .get(slot.opponent())
            .as_ref()
            .ok_or(MatchError::OpponentNotReady)?;

        let resolution = resolve_shot(target, self.shots.get(slot), cell);
        self.stats.get_mut(slot).record(resolution.record.outcome);
        let hit = resolution.record.is_hit();
        let ship = resolution.record.ship.clone();
        self.shots.get_mut(slot).push(resolution.record);

        if resolution.fleet_destroyed {
            self.status = MatchStatus::GameOver;
            self.winner = Some(slot);
            self.current_turn = None;
        } else {
            self.current_turn = Some(slot.opponent());
        }
        self.touch(now);

        Ok(ShotReport {
            row: cell.row,
            col: cell.col,
            hit,
            ship,
            sunk_ship: resolution.sunk_ship,
            game_over: resolution.fleet_destroyed,
            winner: self.winner,
        })
    }

    /// Ends an unfinished match without a winner. Finished matches are left
    /// as they are; repeated calls are no-ops.
    pub fn abandon(&mut self, slot: Slot, now: DateTime<Utc>) -> Result<MatchStatus, MatchError> {
        self.ensure_participant(slot)?;
        if !self.status.is_terminal() {
            self.status = MatchStatus::Abandoned;
            self.current_turn = None;
            self.touch(now);
        }
        Ok(self.status)
    }

    pub fn placement_of(&self, slot: Slot) -> Result<&Placement, MatchError> {
        self.ensure_participant(slot)?;
        self.placements.get(slot).as_ref().ok_or_else(|| {
            MatchError::NotFound(format!(
                "placement for slot {slot} in match {}",
                self.match_id
            ))
        })
    }

    pub fn state_view(&self, slot: Slot) -> Result<MatchStateView, MatchError> {
        self.ensure_participant(slot)?;
        let opponent = slot.opponent();
        Ok(MatchStateView {
            match_id: self.match_id.clone(),
            status: self.status,
            current_turn: self.current_turn,
            is_my_turn: self.current_turn == Some(slot),
            opponent_joined: self.has_participant(opponent),
            opponent_ready: self.participants.get(opponent).is_some_and(|p| p.ready),
            my_shots: self.shots.get(slot).clone(),
            opponent_shots: self.shots.get(opponent).clone(),
            winner: self.winner,
            stats: self.stats_for(slot),
        })
    }

    pub fn stats_for(&self, slot: Slot) -> StatsView {
        StatsView {
            mine: *self.stats.get(slot),
            opponent: *self.stats.get(slot.opponent()),
        }
    }

    /// Total shots fired by both sides.
    pub fn shots_fired(&self) -> u32 {
        self.stats.one.shots_fired + self.stats.two.shots_fired
    }
}
