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

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod board;
pub mod bot;
pub mod engine;

pub use board::{
    MAX_RANDOM_PLACEMENT_ATTEMPTS, PlacementViolation, Rules, RulesError, ShipSpec,
    UnplaceableFleet, check_placement, fallback_placement, random_placement, validate_placement,
};
pub use bot::{BotGunner, bot_placement};
pub use engine::{ShotResolution, resolve_shot};

pub const GRID_SIZE: u8 = 10;
pub const MATCH_ID_LEN: usize = 6;

const MATCH_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// One of the two participant positions in a match.
///
/// Serialized as the bare integers `1` and `2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "u8", try_from = "u8")]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::One, Slot::Two];

    pub fn number(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }

    pub fn opponent(self) -> Slot {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.number()
    }
}

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            other => Err(InvalidSlot(other)),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot must be 1 or 2, got {0}")]
pub struct InvalidSlot(pub u8);

/// A pair of values, one per slot. Serialized with the keys `"1"` and `"2"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerSlot<T> {
    #[serde(rename = "1")]
    pub one: T,
    #[serde(rename = "2")]
    pub two: T,
}

impl<T> PerSlot<T> {
    pub fn new(one: T, two: T) -> Self {
        Self { one, two }
    }

    pub fn get(&self, slot: Slot) -> &T {
        match slot {
            Slot::One => &self.one,
            Slot::Two => &self.two,
        }
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut T {
        match slot {
            Slot::One => &mut self.one,
            Slot::Two => &mut self.two,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: u8,
    pub col: u8,
}

impl Cell {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A participant's fleet layout: ship name to the cells it occupies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Placement(BTreeMap<String, Vec<Cell>>);

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ship(mut self, name: impl Into<String>, cells: Vec<Cell>) -> Self {
        self.insert(name, cells);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, cells: Vec<Cell>) {
        self.0.insert(name.into(), cells);
    }

    pub fn get(&self, name: &str) -> Option<&[Cell]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn ships(&self) -> impl Iterator<Item = (&str, &[Cell])> {
        self.0
            .iter()
            .map(|(name, cells)| (name.as_str(), cells.as_slice()))
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.0.values().flatten().copied()
    }

    /// Name of the ship covering `cell`, if any.
    pub fn ship_at(&self, cell: Cell) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, cells)| cells.contains(&cell))
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<Cell>)> for Placement {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Cell>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Playing,
    GameOver,
    Abandoned,
}

impl MatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::GameOver | MatchStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Playing => "playing",
            MatchStatus::GameOver => "game_over",
            MatchStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShotOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShotRecord {
    #[serde(flatten)]
    pub cell: Cell,
    pub outcome: ShotOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship: Option<String>,
}

impl ShotRecord {
    pub fn is_hit(&self) -> bool {
        self.outcome == ShotOutcome::Hit
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchStats {
    pub shots_fired: u32,
    pub hits: u32,
    pub misses: u32,
}

impl MatchStats {
    pub fn record(&mut self, outcome: ShotOutcome) {
        self.shots_fired += 1;
        match outcome {
            ShotOutcome::Hit => self.hits += 1,
            ShotOutcome::Miss => self.misses += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub ready: bool,
}

/// The persisted match aggregate. Every change goes through a
/// load-mutate-save cycle against the store, guarded by `version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub match_id: String,
    pub version: u64,
    pub status: MatchStatus,
    pub participants: PerSlot<Option<Participant>>,
    pub current_turn: Option<Slot>,
    pub placements: PerSlot<Option<Placement>>,
    pub shots: PerSlot<Vec<ShotRecord>>,
    pub stats: PerSlot<MatchStats>,
    pub winner: Option<Slot>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(match_id: impl Into<String>, slot: Slot, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            match_id: match_id.into(),
            version: 1,
            status: MatchStatus::Waiting,
            participants: PerSlot::default(),
            current_turn: None,
            placements: PerSlot::default(),
            shots: PerSlot::default(),
            stats: PerSlot::default(),
            winner: None,
            created_at: now,
            last_activity: now,
        };
        record.register(slot);
        record
    }

    pub fn has_participant(&self, slot: Slot) -> bool {
        self.participants.get(slot).is_some()
    }

    /// Adds `slot` as a not-yet-ready participant. Returns false if it was already present.
    pub fn register(&mut self, slot: Slot) -> bool {
        let entry = self.participants.get_mut(slot);
        if entry.is_some() {
            return false;
        }
        *entry = Some(Participant::default());
        true
    }

    /// A waiting match whose first slot is taken and whose second is free.
    pub fn is_open_for_second_player(&self) -> bool {
        self.status == MatchStatus::Waiting
            && self.has_participant(Slot::One)
            && !self.has_participant(Slot::Two)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) > threshold
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.match_id.clone(),
            status: self.status,
            players: self.participants.clone(),
            current_turn: self.current_turn,
            has_placements: self.placements.one.is_some() || self.placements.two.is_some(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("invalid session: {0}")]
    InvalidSession(String),
    #[error("invalid placement: {0}")]
    InvalidPlacement(#[from] PlacementViolation),
    #[error("not your turn")]
    NotYourTurn,
    #[error("already fired at {0}")]
    DuplicateShot(Cell),
    #[error("opponent has not placed ships yet")]
    OpponentNotReady,
    #[error("match is {0}, not playing")]
    GameNotPlaying(MatchStatus),
    #[error("placement cannot change once play has started")]
    PlacementLocked,
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            MatchError::InvalidSession(_) => "INVALID_SESSION",
            MatchError::InvalidPlacement(_) => "INVALID_PLACEMENT",
            MatchError::NotYourTurn => "NOT_YOUR_TURN",
            MatchError::DuplicateShot(_) => "DUPLICATE_SHOT",
            MatchError::OpponentNotReady => "OPPONENT_NOT_READY",
            MatchError::GameNotPlaying(_) => "GAME_NOT_PLAYING",
            MatchError::PlacementLocked => "PLACEMENT_LOCKED",
            MatchError::NotFound(_) => "NOT_FOUND",
            MatchError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            MatchError::Internal(_) => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMatchRequest {
    pub slot: Slot,
    /// Match id remembered from an earlier session, if any.
    #[serde(default)]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMatchResponse {
    pub match_id: String,
    pub slot: Slot,
    pub status: MatchStatus,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPlacementRequest {
    pub slot: Slot,
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPlacementResponse {
    pub match_id: String,
    pub status: MatchStatus,
    pub both_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub match_id: String,
    pub slot: Slot,
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireShotRequest {
    pub slot: Slot,
    pub row: u8,
    pub col: u8,
}

/// Outcome of one resolved shot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShotReport {
    pub row: u8,
    pub col: u8,
    pub hit: bool,
    /// Ship struck by this shot.
    pub ship: Option<String>,
    /// Set when this shot sank `ship`.
    pub sunk_ship: Option<String>,
    pub game_over: bool,
    pub winner: Option<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonRequest {
    pub slot: Slot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbandonResponse {
    pub match_id: String,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsView {
    pub mine: MatchStats,
    pub opponent: MatchStats,
}

/// One participant's view of a match. Never includes the opponent's placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStateView {
    pub match_id: String,
    pub status: MatchStatus,
    pub current_turn: Option<Slot>,
    pub is_my_turn: bool,
    pub opponent_joined: bool,
    pub opponent_ready: bool,
    pub my_shots: Vec<ShotRecord>,
    pub opponent_shots: Vec<ShotRecord>,
    pub winner: Option<Slot>,
    pub stats: StatsView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub status: MatchStatus,
    pub players: PerSlot<Option<Participant>>,
    pub current_turn: Option<Slot>,
    pub has_placements: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSoloRequest {
    pub placement: Placement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSoloResponse {
    pub solo_id: String,
    pub status: MatchStatus,
    pub current_turn: Option<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloShotRequest {
    pub row: u8,
    pub col: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloShotResponse {
    pub player_shot: ShotReport,
    /// The bot's answer, absent once the player's shot ended the game.
    pub bot_shot: Option<ShotReport>,
    pub status: MatchStatus,
    pub winner: Option<Slot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloStateView {
    pub solo_id: String,
    pub status: MatchStatus,
    pub winner: Option<Slot>,
    pub my_placement: Placement,
    pub my_shots: Vec<ShotRecord>,
    pub bot_shots: Vec<ShotRecord>,
    pub stats: StatsView,
    /// Revealed once the game is over.
    pub bot_placement: Option<Placement>,
}

pub fn generate_match_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..MATCH_ID_LEN)
        .map(|_| MATCH_ID_ALPHABET[rng.random_range(0..MATCH_ID_ALPHABET.len())] as char)
        .collect()
}

/// Ids are short upper-case alphanumeric tokens; anything else never names a stored match.
pub fn is_valid_match_id(value: &str) -> bool {
    value.len() == MATCH_ID_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn slot_serializes_as_bare_number() {
        assert_eq!(serde_json::to_string(&Slot::Two).unwrap(), "2");
        assert_eq!(serde_json::from_str::<Slot>("1").unwrap(), Slot::One);
        assert!(serde_json::from_str::<Slot>("3").is_err());
        assert_eq!(Slot::One.opponent(), Slot::Two);
        assert_eq!(Slot::Two.opponent(), Slot::One);
    }

    #[test]
    fn per_slot_uses_numbered_keys() {
        let stats = PerSlot::new(
            MatchStats {
                shots_fired: 2,
                hits: 1,
                misses: 1,
            },
            MatchStats::default(),
        );
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["1"]["hits"], 1);
        assert_eq!(value["2"]["shots_fired"], 0);
    }

    #[test]
    fn shot_record_flattens_cell() {
        let record = ShotRecord {
            cell: Cell::new(3, 4),
            outcome: ShotOutcome::Hit,
            ship: Some("cruiser".to_string()),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["row"], 3);
        assert_eq!(value["col"], 4);
        assert_eq!(value["outcome"], "hit");
        assert_eq!(value["ship"], "cruiser");

        let miss: ShotRecord =
            serde_json::from_str(r#"{"row":0,"col":9,"outcome":"miss"}"#).unwrap();
        assert_eq!(miss.ship, None);
        assert!(!miss.is_hit());
    }

    #[test]
    fn generated_match_ids_are_valid() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let id = generate_match_id(&mut rng);
            assert_eq!(id.len(), MATCH_ID_LEN);
            assert!(is_valid_match_id(&id), "bad id {id}");
        }
        assert!(!is_valid_match_id("abc123"));
        assert!(!is_valid_match_id("../../x"));
        assert!(!is_valid_match_id("ABC12"));
    }

    #[test]
    fn new_record_registers_creator_and_waits() {
        let record = MatchRecord::new("AB12CD", Slot::One, at(0));
        assert_eq!(record.status, MatchStatus::Waiting);
        assert_eq!(record.version, 1);
        assert!(record.has_participant(Slot::One));
        assert!(!record.has_participant(Slot::Two));
        assert!(record.is_open_for_second_player());
        assert_eq!(record.current_turn, None);
        assert_eq!(record.winner, None);

        let second = MatchRecord::new("ZZ99ZZ", Slot::Two, at(0));
        assert!(!second.is_open_for_second_player());
    }

    #[test]
    fn staleness_is_strictly_beyond_threshold() {
        let record = MatchRecord::new("AB12CD", Slot::One, at(0));
        let threshold = chrono::Duration::seconds(60);
        assert!(!record.is_stale(at(60), threshold));
        assert!(record.is_stale(at(61), threshold));
    }

    #[test]
    fn error_kinds_are_stable_tags() {
        assert_eq!(MatchError::NotYourTurn.kind(), "NOT_YOUR_TURN");
        assert_eq!(
            MatchError::DuplicateShot(Cell::new(1, 1)).to_string(),
            "already fired at (1, 1)"
        );
        assert_eq!(
            MatchError::GameNotPlaying(MatchStatus::GameOver).to_string(),
            "match is game_over, not playing"
        );
    }
}
