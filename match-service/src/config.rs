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

use std::{path::PathBuf, time::Duration};

use armada_common::Rules;
use tracing::warn;

pub const DEFAULT_REAPER_CADENCE_SECONDS: u64 = 15 * 60;
pub const DEFAULT_INACTIVITY_SECONDS: u64 = 60 * 60;
pub const DEFAULT_REAPER_POLL_SECONDS: u64 = 60;
pub const DEFAULT_SAVE_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    File {
        dir: PathBuf,
    },
    Dynamo {
        table_name: String,
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: StoreBackend,
    pub reaper_cadence: chrono::Duration,
    pub inactivity_threshold: chrono::Duration,
    pub reaper_poll: Duration,
    pub save_attempts: u32,
    pub rules: Rules,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("MATCH_STORE_BACKEND")
            .ok()
            .unwrap_or_else(|| "file".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "file" => StoreBackend::File {
                dir: std::env::var("MATCH_STORE_DIR")
                    .ok()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| std::env::temp_dir().join("armada_matches")),
            },
            "dynamodb" => StoreBackend::Dynamo {
                table_name: std::env::var("MATCHES_TABLE")
                    .ok()
                    .unwrap_or_else(|| "armada_matches".to_string()),
                endpoint: std::env::var("DYNAMODB_ENDPOINT").ok(),
            },
            other => anyhow::bail!(
                "invalid MATCH_STORE_BACKEND {other:?}; expected memory, file or dynamodb"
            ),
        };

        Ok(Self {
            backend,
            reaper_cadence: env_seconds("REAPER_CADENCE_SECONDS", DEFAULT_REAPER_CADENCE_SECONDS),
            inactivity_threshold: env_seconds(
                "MATCH_INACTIVITY_SECONDS",
                DEFAULT_INACTIVITY_SECONDS,
            ),
            reaper_poll: Duration::from_secs(env_u64(
                "REAPER_POLL_SECONDS",
                DEFAULT_REAPER_POLL_SECONDS,
            )),
            save_attempts: std::env::var("MATCH_SAVE_ATTEMPTS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_SAVE_ATTEMPTS)
                .max(1),
            rules: load_rules_config().unwrap_or_default(),
        })
    }
}

fn env_u64(var_name: &str, default: u64) -> u64 {
    std::env::var(var_name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
        .max(1)
}

fn env_seconds(var_name: &str, default: u64) -> chrono::Duration {
    seconds_or_default(var_name, env_u64(var_name, default), default)
}

/// Values too large for a `chrono::Duration` warn and use `default`.
fn seconds_or_default(var_name: &str, seconds: u64, default: u64) -> chrono::Duration {
    let as_duration = |value: u64| {
        i64::try_from(value)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    };
    as_duration(seconds).unwrap_or_else(|| {
        warn!(var = var_name, seconds, default, "duration out of range; using default");
        as_duration(default).unwrap_or(chrono::Duration::MAX)
    })
}

/// Reads the optional YAML rules override. Any problem falls back to the
/// standard rules with a warning.
pub fn load_rules_config() -> Option<Rules> {
    let path = std::env::var("GAME_RULES_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read game rules config file");
            return None;
        }
    };

    parse_rules(&path, &raw)
}

fn parse_rules(path: &str, raw: &str) -> Option<Rules> {
    if raw.trim().is_empty() {
        warn!(path = %path, "game rules config file is empty");
        return None;
    }

    let rules = match serde_yaml::from_str::<Rules>(raw) {
        Ok(rules) => rules,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse game rules config yaml");
            return None;
        }
    };

    if let Err(error) = rules.check() {
        warn!(path = %path, error = %error, "game rules config rejected");
        return None;
    }
    Some(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_custom_fleet() {
        let raw = r#"
grid_size: 6
ships:
  - name: frigate
    length: 3
  - name: skiff
    length: 1
"#;
        let rules = parse_rules("rules.yaml", raw).unwrap();
        assert_eq!(rules.grid_size, 6);
        assert_eq!(rules.ship_length("frigate"), Some(3));
        assert_eq!(rules.fleet_cells(), 4);
    }

    #[test]
    fn rejects_empty_malformed_and_unplaceable_configs() {
        assert!(parse_rules("rules.yaml", "   \n").is_none());
        assert!(parse_rules("rules.yaml", "grid_size: [").is_none());
        let crowded = r#"
grid_size: 2
ships:
  - name: a
    length: 2
  - name: b
    length: 2
  - name: c
    length: 2
"#;
        assert!(parse_rules("rules.yaml", crowded).is_none());
    }

    #[test]
    fn env_numbers_fall_back_on_garbage() {
        assert_eq!(env_u64("ARMADA_TEST_UNSET_VARIABLE", 42), 42);
    }

    #[test]
    fn oversized_durations_fall_back_to_default() {
        assert_eq!(
            seconds_or_default("REAPER_CADENCE_SECONDS", 90, 900),
            chrono::Duration::seconds(90)
        );
        assert_eq!(
            seconds_or_default("REAPER_CADENCE_SECONDS", u64::MAX, 900),
            chrono::Duration::seconds(900)
        );
        assert_eq!(
            seconds_or_default("MATCH_INACTIVITY_SECONDS", 9_300_000_000_000_000, 3600),
            chrono::Duration::seconds(3600)
        );
    }
}
