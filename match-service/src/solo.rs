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

//! Single-player games against the bot. The human is slot 1, the bot slot 2.
//! Sessions live only in this process.

use std::{collections::HashMap, sync::Arc};

use armada_common::{
    BotGunner, Cell, MatchError, MatchRecord, MatchStatus, Placement, Rules, Slot,
    SoloShotResponse, SoloStateView, StartSoloResponse, bot_placement, check_placement,
    generate_match_id,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

struct SoloGame {
    record: MatchRecord,
    gunner: BotGunner,
}

#[derive(Clone)]
pub struct SoloSessions {
    games: Arc<Mutex<HashMap<String, SoloGame>>>,
    rules: Arc<Rules>,
}

impl SoloSessions {
    pub fn new(rules: Arc<Rules>) -> Self {
        Self {
            games: Arc::new(Mutex::new(HashMap::new())),
            rules,
        }
    }

    pub async fn start(
        &self,
        placement: Placement,
        now: DateTime<Utc>,
    ) -> Result<StartSoloResponse, MatchError> {
        check_placement(&self.rules, &placement)?;
        let mut games = self.games.lock().await;

        let (solo_id, bot_fleet) = {
            let mut rng = rand::rng();
            let bot_fleet = bot_placement(&self.rules, &mut rng).map_err(|error| {
                error!(error = %error, "bot fleet could not be laid out");
                MatchError::Internal(format!("bot fleet could not be laid out: {error}"))
            })?;
            let mut solo_id = generate_match_id(&mut rng);
            while games.contains_key(&solo_id) {
                solo_id = generate_match_id(&mut rng);
            }
            (solo_id, bot_fleet)
        };

        let mut record = MatchRecord::new(solo_id.clone(), Slot::One, now);
        record.register(Slot::Two);
        record.submit_placement(&self.rules, Slot::One, placement, now)?;
        record.submit_placement(&self.rules, Slot::Two, bot_fleet, now)?;

        let response = StartSoloResponse {
            solo_id: solo_id.clone(),
            status: record.status,
            current_turn: record.current_turn,
        };
        games.insert(
            solo_id.clone(),
            SoloGame {
                record,
                gunner: BotGunner::new(),
            },
        );
        info!(solo_id = %solo_id, "solo game started");
        Ok(response)
    }

    /// Fires the player's shot and, unless it ended the game, the bot's reply.
    pub async fn fire(
        &self,
        solo_id: &str,
        cell: Cell,
        now: DateTime<Utc>,
    ) -> Result<SoloShotResponse, MatchError> {
        let mut games = self.games.lock().await;
        let game = games
            .get_mut(solo_id)
            .ok_or_else(|| MatchError::NotFound(format!("solo game {solo_id}")))?;
        let response = play_round(game, self.rules.grid_size, cell, now)?;
        if response.status.is_terminal() {
            info!(solo_id = %solo_id, winner = ?response.winner, "solo game finished");
        }
        Ok(response)
    }

    pub async fn view(&self, solo_id: &str, now: DateTime<Utc>) -> Result<SoloStateView, MatchError> {
        let mut games = self.games.lock().await;
        let game = games
            .get_mut(solo_id)
            .ok_or_else(|| MatchError::NotFound(format!("solo game {solo_id}")))?;
        game.record.touch(now);

        let record = &game.record;
        let over = record.status == MatchStatus::GameOver;
        Ok(SoloStateView {
            solo_id: solo_id.to_string(),
            status: record.status,
            winner: record.winner,
            my_placement: record.placement_of(Slot::One)?.clone(),
            my_shots: record.shots.one.clone(),
            bot_shots: record.shots.two.clone(),
            stats: record.stats_for(Slot::One),
            bot_placement: if over {
                Some(record.placement_of(Slot::Two)?.clone())
            } else {
                None
            },
        })
    }

    /// Drops sessions idle for longer than `threshold`. Returns how many went.
    pub async fn prune(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> usize {
        let mut games = self.games.lock().await;
        let before = games.len();
        games.retain(|_, game| !game.record.is_stale(now, threshold));
        before - games.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.games.lock().await.len()
    }
}

fn play_round(
    game: &mut SoloGame,
    grid_size: u8,
    cell: Cell,
    now: DateTime<Utc>,
) -> Result<SoloShotResponse, MatchError> {
    let player_shot = game.record.fire_shot(Slot::One, cell, now)?;

    let bot_shot = if player_shot.game_over {
        None
    } else {
        let mut rng = rand::rng();
        match game
            .gunner
            .next_target(grid_size, &game.record.shots.two, &mut rng)
        {
            Some(target) => {
                let report = game.record.fire_shot(Slot::Two, target, now)?;
                game.gunner
                    .observe(grid_size, &game.record.shots.two, &report);
                Some(report)
            }
            None => None,
        }
    };

    Ok(SoloShotResponse {
        player_shot,
        bot_shot,
        status: game.record.status,
        winner: game.record.winner,
    })
}
