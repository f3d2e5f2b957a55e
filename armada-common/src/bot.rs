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

use std::collections::{HashSet, VecDeque};

use rand::Rng;

use crate::{Cell, Placement, Rules, ShotRecord, ShotReport, UnplaceableFleet, random_placement};

pub fn bot_placement<R: Rng + ?Sized>(
    rules: &Rules,
    rng: &mut R,
) -> Result<Placement, UnplaceableFleet> {
    random_placement(rules, rng)
}

/// Hunt/target shot picker for the single-player opponent.
///
/// Hunting fires at random open cells. A hit queues its open neighbours; a
/// second hit next to the previous one narrows the queue to that line and
/// tries the extension first. Sinking a ship drops back to hunting.
#[derive(Debug, Clone, Default)]
pub struct BotGunner {
    queue: VecDeque<Cell>,
    last_hit: Option<Cell>,
}

impl BotGunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next cell to fire at, or `None` once every cell has been fired at.
    pub fn next_target<R: Rng + ?Sized>(
        &mut self,
        grid_size: u8,
        fired: &[ShotRecord],
        rng: &mut R,
    ) -> Option<Cell> {
        let fired: HashSet<Cell> = fired.iter().map(|shot| shot.cell).collect();
        while let Some(cell) = self.queue.pop_front() {
            if !fired.contains(&cell) {
                return Some(cell);
            }
        }

        let open: Vec<Cell> = (0..grid_size)
            .flat_map(|row| (0..grid_size).map(move |col| Cell::new(row, col)))
            .filter(|cell| !fired.contains(cell))
            .collect();
        if open.is_empty() {
            return None;
        }
        Some(open[rng.random_range(0..open.len())])
    }

    /// Feeds back the result of the shot just taken. `fired` includes it.
    pub fn observe(&mut self, grid_size: u8, fired: &[ShotRecord], report: &ShotReport) {
        if !report.hit {
            return;
        }
        if report.sunk_ship.is_some() {
            self.queue.clear();
            self.last_hit = None;
            return;
        }

        let cell = Cell::new(report.row, report.col);
        let fired: HashSet<Cell> = fired.iter().map(|shot| shot.cell).collect();
        for neighbour in neighbours(cell, grid_size) {
            if !fired.contains(&neighbour) && !self.queue.contains(&neighbour) {
                self.queue.push_back(neighbour);
            }
        }

        if let Some(previous) = self.last_hit {
            let vertical = previous.col == cell.col && previous.row.abs_diff(cell.row) == 1;
            let horizontal = previous.row == cell.row && previous.col.abs_diff(cell.col) == 1;
            if vertical || horizontal {
                self.queue.retain(|target| {
                    if vertical {
                        target.col == cell.col
                    } else {
                        target.row == cell.row
                    }
                });
                if let Some(extension) = extend(previous, cell, grid_size)
                    && !fired.contains(&extension)
                {
                    self.queue.retain(|target| *target != extension);
                    self.queue.push_front(extension);
                }
            }
        }
        self.last_hit = Some(cell);
    }
}

fn neighbours(cell: Cell, grid_size: u8) -> impl Iterator<Item = Cell> {
    let (row, col) = (cell.row as i16, cell.col as i16);
    [(-1, 0), (1, 0), (0, -1), (0, 1)]
        .into_iter()
        .filter_map(move |(dr, dc)| offset(row + dr, col + dc, grid_size))
}

/// The cell one step past `current`, continuing the line from `previous`.
fn extend(previous: Cell, current: Cell, grid_size: u8) -> Option<Cell> {
    let row = 2 * current.row as i16 - previous.row as i16;
    let col = 2 * current.col as i16 - previous.col as i16;
    offset(row, col, grid_size)
}

fn offset(row: i16, col: i16, grid_size: u8) -> Option<Cell> {
    let grid = grid_size as i16;
    if (0..grid).contains(&row) && (0..grid).contains(&col) {
        Some(Cell::new(row as u8, col as u8))
    } else {
        None
    }
}
