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

//! Grid geometry: fleet catalog, placement validation and random layouts.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Cell, GRID_SIZE, Placement};

/// Per-ship budget of random anchor draws before falling back to first-fit.
pub const MAX_RANDOM_PLACEMENT_ATTEMPTS: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShipSpec {
    pub name: String,
    pub length: u8,
}

impl ShipSpec {
    pub fn new(name: impl Into<String>, length: u8) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rules {
    pub grid_size: u8,
    pub ships: Vec<ShipSpec>,
}

impl Default for Rules {
    fn default() -> Self {
        Self::standard()
    }
}

impl Rules {
    /// 10x10 grid with the classic five-ship fleet.
    pub fn standard() -> Self {
        Self {
            grid_size: GRID_SIZE,
            ships: vec![
                ShipSpec::new("carrier", 5),
                ShipSpec::new("battleship", 4),
                ShipSpec::new("cruiser", 3),
                ShipSpec::new("submarine", 3),
                ShipSpec::new("destroyer", 2),
            ],
        }
    }

    pub fn ship_length(&self, name: &str) -> Option<u8> {
        self.ships
            .iter()
            .find(|ship| ship.name == name)
            .map(|ship| ship.length)
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.row < self.grid_size && cell.col < self.grid_size
    }

    pub fn fleet_cells(&self) -> usize {
        self.ships.iter().map(|ship| ship.length as usize).sum()
    }

    pub fn check(&self) -> Result<(), RulesError> {
        if self.grid_size == 0 {
            return Err(RulesError::EmptyGrid);
        }
        if self.ships.is_empty() {
            return Err(RulesError::EmptyFleet);
        }
        let mut seen = HashSet::new();
        for ship in &self.ships {
            if !seen.insert(ship.name.as_str()) {
                return Err(RulesError::DuplicateShip(ship.name.clone()));
            }
            if ship.length == 0 || ship.length > self.grid_size {
                return Err(RulesError::BadLength {
                    name: ship.name.clone(),
                    length: ship.length,
                    grid_size: self.grid_size,
                });
            }
        }
        if fallback_placement(self).is_none() {
            return Err(RulesError::Unplaceable(self.grid_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("grid size must be at least 1")]
    EmptyGrid,
    #[error("fleet has no ships")]
    EmptyFleet,
    #[error("ship {0} is listed more than once")]
    DuplicateShip(String),
    #[error("ship {name} has length {length}, outside 1..={grid_size}")]
    BadLength {
        name: String,
        length: u8,
        grid_size: u8,
    },
    #[error("fleet cannot be laid out on a {0}x{0} grid")]
    Unplaceable(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementViolation {
    #[error("missing ship {0}")]
    MissingShip(String),
    #[error("unknown ship {0}")]
    UnknownShip(String),
    #[error("ship {ship} has {actual} cells, expected {expected}")]
    WrongLength {
        ship: String,
        expected: u8,
        actual: usize,
    },
    #[error("ship {ship} has a cell outside the grid at {cell}")]
    OutOfBounds { ship: String, cell: Cell },
    #[error("ship {0} is not a straight contiguous line")]
    NotContiguous(String),
    #[error("ships {first} and {second} overlap at {cell}")]
    Overlap {
        first: String,
        second: String,
        cell: Cell,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fleet cannot be laid out on a {grid_size}x{grid_size} grid")]
pub struct UnplaceableFleet {
    pub grid_size: u8,
}

pub fn validate_placement(rules: &Rules, placement: &Placement) -> bool {
    check_placement(rules, placement).is_ok()
}

/// Returns the first rule the placement breaks. Cells of a ship may be listed
/// in any order as long as together they form one unbroken line.
pub fn check_placement(rules: &Rules, placement: &Placement) -> Result<(), PlacementViolation> {
    for spec in &rules.ships {
        if placement.get(&spec.name).is_none() {
            return Err(PlacementViolation::MissingShip(spec.name.clone()));
        }
    }
    for (name, _) in placement.ships() {
        if rules.ship_length(name).is_none() {
            return Err(PlacementViolation::UnknownShip(name.to_string()));
        }
    }

    let mut occupied: HashMap<Cell, &str> = HashMap::new();
    for spec in &rules.ships {
        let cells = placement.get(&spec.name).unwrap_or_default();
        if cells.len() != spec.length as usize {
            return Err(PlacementViolation::WrongLength {
                ship: spec.name.clone(),
                expected: spec.length,
                actual: cells.len(),
            });
        }
        if let Some(&cell) = cells.iter().find(|cell| !rules.in_bounds(**cell)) {
            return Err(PlacementViolation::OutOfBounds {
                ship: spec.name.clone(),
                cell,
            });
        }
        if !is_straight_line(cells) {
            return Err(PlacementViolation::NotContiguous(spec.name.clone()));
        }
        for &cell in cells {
            if let Some(other) = occupied.insert(cell, spec.name.as_str()) {
                return Err(PlacementViolation::Overlap {
                    first: other.to_string(),
                    second: spec.name.clone(),
                    cell,
                });
            }
        }
    }
    Ok(())
}

fn is_straight_line(cells: &[Cell]) -> bool {
    let Some(first) = cells.first() else {
        return false;
    };
    let mut steps: Vec<u8> = if cells.iter().all(|cell| cell.row == first.row) {
        cells.iter().map(|cell| cell.col).collect()
    } else if cells.iter().all(|cell| cell.col == first.col) {
        cells.iter().map(|cell| cell.row).collect()
    } else {
        return false;
    };
    steps.sort_unstable();
    steps.windows(2).all(|pair| pair[1] == pair[0] + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Horizontal,
    Vertical,
}

fn segment(anchor: Cell, orientation: Orientation, length: u8, grid_size: u8) -> Option<Vec<Cell>> {
    let (row, col) = (anchor.row as u16, anchor.col as u16);
    let length = length as u16;
    let grid = grid_size as u16;
    let fits = match orientation {
        Orientation::Horizontal => row < grid && col + length <= grid,
        Orientation::Vertical => col < grid && row + length <= grid,
    };
    if !fits || length == 0 {
        return None;
    }
    Some(
        (0..length as u8)
            .map(|offset| match orientation {
                Orientation::Horizontal => Cell::new(anchor.row, anchor.col + offset),
                Orientation::Vertical => Cell::new(anchor.row + offset, anchor.col),
            })
            .collect(),
    )
}

/// Lays the fleet out at random. If any ship exhausts its attempt budget the
/// whole fleet is laid out by [`fallback_placement`] instead.
pub fn random_placement<R: Rng + ?Sized>(
    rules: &Rules,
    rng: &mut R,
) -> Result<Placement, UnplaceableFleet> {
    let unplaceable = UnplaceableFleet {
        grid_size: rules.grid_size,
    };
    if rules.grid_size == 0 {
        return if rules.ships.is_empty() {
            Ok(Placement::new())
        } else {
            Err(unplaceable)
        };
    }

    let mut placement = Placement::new();
    let mut occupied: HashSet<Cell> = HashSet::new();
    for spec in &rules.ships {
        let mut placed = false;
        for _ in 0..MAX_RANDOM_PLACEMENT_ATTEMPTS {
            let orientation = if rng.random_bool(0.5) {
                Orientation::Horizontal
            } else {
                Orientation::Vertical
            };
            let anchor = Cell::new(
                rng.random_range(0..rules.grid_size),
                rng.random_range(0..rules.grid_size),
            );
            if let Some(cells) = segment(anchor, orientation, spec.length, rules.grid_size)
                && cells.iter().all(|cell| !occupied.contains(cell))
            {
                occupied.extend(cells.iter().copied());
                placement.insert(spec.name.clone(), cells);
                placed = true;
                break;
            }
        }
        if !placed {
            return fallback_placement(rules).ok_or(unplaceable);
        }
    }
    Ok(placement)
}

/// Deterministic first-fit layout: longest ships first, row-major anchors,
/// horizontal before vertical. `None` when some ship finds no free segment.
pub fn fallback_placement(rules: &Rules) -> Option<Placement> {
    let mut order: Vec<&ShipSpec> = rules.ships.iter().collect();
    order.sort_by(|a, b| b.length.cmp(&a.length));

    let mut placement = Placement::new();
    let mut occupied: HashSet<Cell> = HashSet::new();
    for spec in order {
        let cells = (0..rules.grid_size)
            .flat_map(|row| (0..rules.grid_size).map(move |col| Cell::new(row, col)))
            .flat_map(move |anchor| {
                [Orientation::Horizontal, Orientation::Vertical]
                    .into_iter()
                    .filter_map(move |orientation| {
                        segment(anchor, orientation, spec.length, rules.grid_size)
                    })
            })
            .find(|cells| cells.iter().all(|cell| !occupied.contains(cell)))?;
        occupied.extend(cells.iter().copied());
        placement.insert(spec.name.clone(), cells);
    }
    Some(placement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn line(row: u8, col: u8, length: u8, horizontal: bool) -> Vec<Cell> {
        (0..length)
            .map(|i| {
                if horizontal {
                    Cell::new(row, col + i)
                } else {
                    Cell::new(row + i, col)
                }
            })
            .collect()
    }

    fn standard_fleet() -> Placement {
        Placement::new()
            .with_ship("carrier", line(0, 0, 5, true))
            .with_ship("battleship", line(2, 0, 4, true))
            .with_ship("cruiser", line(4, 0, 3, true))
            .with_ship("submarine", line(6, 0, 3, true))
            .with_ship("destroyer", line(8, 8, 2, false))
    }

    #[test]
    fn standard_rules_pass_check() {
        let rules = Rules::standard();
        assert_eq!(rules.fleet_cells(), 17);
        assert!(rules.check().is_ok());
    }

    #[test]
    fn rules_check_rejects_bad_catalogs() {
        let duplicate = Rules {
            grid_size: 5,
            ships: vec![ShipSpec::new("a", 2), ShipSpec::new("a", 2)],
        };
        assert_eq!(
            duplicate.check(),
            Err(RulesError::DuplicateShip("a".to_string()))
        );

        let too_long = Rules {
            grid_size: 3,
            ships: vec![ShipSpec::new("long", 4)],
        };
        assert!(matches!(too_long.check(), Err(RulesError::BadLength { .. })));

        let crowded = Rules {
            grid_size: 2,
            ships: vec![
                ShipSpec::new("a", 2),
                ShipSpec::new("b", 2),
                ShipSpec::new("c", 1),
            ],
        };
        assert_eq!(crowded.check(), Err(RulesError::Unplaceable(2)));
    }

    #[test]
    fn accepts_well_formed_fleet_in_any_cell_order() {
        let rules = Rules::standard();
        let mut cells = line(3, 9, 3, false);
        cells.reverse();
        let placement = standard_fleet().with_ship("cruiser", cells);
        assert_eq!(check_placement(&rules, &placement), Ok(()));
        assert!(validate_placement(&rules, &placement));
    }

    #[test]
    fn reports_missing_and_unknown_ships() {
        let rules = Rules::standard();
        let missing: Placement = standard_fleet()
            .ships()
            .filter(|(name, _)| *name != "destroyer")
            .map(|(name, cells)| (name.to_string(), cells.to_vec()))
            .collect();
        assert_eq!(
            check_placement(&rules, &missing),
            Err(PlacementViolation::MissingShip("destroyer".to_string()))
        );

        let extra = standard_fleet().with_ship("dinghy", vec![Cell::new(9, 0)]);
        assert_eq!(
            check_placement(&rules, &extra),
            Err(PlacementViolation::UnknownShip("dinghy".to_string()))
        );
    }

    #[test]
    fn rejects_wrong_length_gaps_and_diagonals() {
        let rules = Rules::standard();

        let short = standard_fleet().with_ship("carrier", line(0, 0, 4, true));
        assert!(matches!(
            check_placement(&rules, &short),
            Err(PlacementViolation::WrongLength { expected: 5, actual: 4, .. })
        ));

        let gap = standard_fleet().with_ship(
            "destroyer",
            vec![Cell::new(8, 8), Cell::new(8, 5)],
        );
        assert_eq!(
            check_placement(&rules, &gap),
            Err(PlacementViolation::NotContiguous("destroyer".to_string()))
        );

        let diagonal = standard_fleet().with_ship(
            "destroyer",
            vec![Cell::new(8, 8), Cell::new(9, 9)],
        );
        assert!(!validate_placement(&rules, &diagonal));

        let repeated = standard_fleet().with_ship(
            "destroyer",
            vec![Cell::new(8, 8), Cell::new(8, 8)],
        );
        assert!(!validate_placement(&rules, &repeated));
    }

    #[test]
    fn rejects_out_of_bounds_and_overlap() {
        let rules = Rules::standard();

        let outside = standard_fleet().with_ship("destroyer", line(9, 9, 2, true));
        assert_eq!(
            check_placement(&rules, &outside),
            Err(PlacementViolation::OutOfBounds {
                ship: "destroyer".to_string(),
                cell: Cell::new(9, 10),
            })
        );

        let crossing = standard_fleet().with_ship("destroyer", line(0, 4, 2, false));
        assert!(matches!(
            check_placement(&rules, &crossing),
            Err(PlacementViolation::Overlap { cell, .. }) if cell == Cell::new(0, 4)
        ));
    }

    #[test]
    fn tight_fleet_still_gets_a_layout() {
        // Only a handful of layouts exist; random draws usually fail and the
        // first-fit layout takes over.
        let rules = Rules {
            grid_size: 3,
            ships: vec![
                ShipSpec::new("a", 3),
                ShipSpec::new("b", 3),
                ShipSpec::new("c", 3),
            ],
        };
        assert!(rules.check().is_ok());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let placement = random_placement(&rules, &mut rng).unwrap();
            assert!(validate_placement(&rules, &placement));
        }
    }

    #[test]
    fn unplaceable_fleet_is_an_error() {
        let rules = Rules {
            grid_size: 2,
            ships: vec![ShipSpec::new("a", 2), ShipSpec::new("b", 2), ShipSpec::new("c", 2)],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            random_placement(&rules, &mut rng),
            Err(UnplaceableFleet { grid_size: 2 })
        );
    }

    proptest! {
        #[test]
        fn random_placement_is_always_valid(seed in any::<u64>()) {
            let rules = Rules::standard();
            let mut rng = StdRng::seed_from_u64(seed);
            let placement = random_placement(&rules, &mut rng).unwrap();
            prop_assert_eq!(check_placement(&rules, &placement), Ok(()));
            prop_assert_eq!(placement.cells().count(), rules.fleet_cells());
        }
    }
}
