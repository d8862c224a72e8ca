use std::ops::Range;

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::error::Error;

pub const DEAD: u8 = 0x00;
pub const ALIVE: u8 = 0xFF;

/// One full row of cell bytes.
pub type Row = Vec<u8>;

/// Position of a cell, `x` being the column and `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
}

impl Cell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl From<(usize, usize)> for Cell {
    fn from((x, y): (usize, usize)) -> Self {
        Self { x, y }
    }
}

/// A toroidal grid of cells stored row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct World {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

/// A worker's slice of the world: the rows it owns plus one padding row on
/// each side holding the neighbouring bands' boundary rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Band {
    pub index: usize,
    pub rows: Range<usize>,
    /// `rows.len() + 2` rows, the first and last being padding.
    pub cells: Vec<Row>,
}

impl Band {
    pub fn width(&self) -> usize {
        self.cells.first().map_or(0, |r| r.len())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// The owned rows without padding.
    pub fn owned(&self) -> &[Row] {
        &self.cells[1..self.cells.len() - 1]
    }
}

impl World {
    pub fn new(width: usize, height: usize) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            Err(Error::InvalidWorld(format!("{width}x{height} has no cells")))?
        }
        Ok(Self {
            width,
            height,
            cells: vec![DEAD; width * height],
        })
    }

    /// Builds a world from raw bytes; any non-zero byte is an alive cell.
    pub fn from_bytes(
        width: usize,
        height: usize,
        bytes: Vec<u8>,
    ) -> Result<Self, Error> {
        let mut world = Self::new(width, height)?;
        if bytes.len() != world.cells.len() {
            Err(Error::InvalidWorld(format!(
                "expected {} bytes for {width}x{height}, got {}",
                world.cells.len(),
                bytes.len()
            )))?
        }
        for (cell, byte) in world.cells.iter_mut().zip(bytes) {
            *cell = if byte == DEAD { DEAD } else { ALIVE };
        }
        Ok(world)
    }

    pub fn with_alive(
        width: usize,
        height: usize,
        alive: &[Cell],
    ) -> Result<Self, Error> {
        let mut world = Self::new(width, height)?;
        for &cell in alive {
            world.set(cell, true)?;
        }
        Ok(world)
    }

    /// A reproducible random world where each cell is alive with probability
    /// `density`.
    pub fn random(
        width: usize,
        height: usize,
        density: f64,
        seed: u64,
    ) -> Result<Self, Error> {
        let mut world = Self::new(width, height)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let density = density.clamp(0.0, 1.0);
        for cell in world.cells.iter_mut() {
            if rng.gen_bool(density) {
                *cell = ALIVE;
            }
        }
        Ok(world)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.cells
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.cells.chunks(self.width)
    }

    fn offset(&self, cell: Cell) -> Option<usize> {
        (cell.x < self.width && cell.y < self.height)
            .then(|| cell.y * self.width + cell.x)
    }

    /// `None` for cells outside the world.
    pub fn is_alive(&self, cell: Cell) -> Option<bool> {
        self.offset(cell).map(|i| self.cells[i] == ALIVE)
    }

    pub fn set(&mut self, cell: Cell, alive: bool) -> Result<(), Error> {
        let Some(i) = self.offset(cell) else {
            return Err(Error::InvalidWorld(format!(
                "cell ({}, {}) outside {}x{}",
                cell.x, cell.y, self.width, self.height
            )));
        };
        self.cells[i] = if alive { ALIVE } else { DEAD };
        Ok(())
    }

    /// Alive cells in row-major order.
    pub fn alive_cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == ALIVE)
            .map(|(i, _)| Cell::new(i % self.width, i / self.width))
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == ALIVE).count()
    }

    /// Cuts out the rows `rows` with one wrapped padding row on each side.
    pub fn band(&self, index: usize, rows: Range<usize>) -> Band {
        let above = (rows.start + self.height - 1) % self.height;
        let below = rows.end % self.height;
        let cells = std::iter::once(above)
            .chain(rows.clone())
            .chain(std::iter::once(below))
            .map(|y| self.row(y).to_vec())
            .collect();
        Band { index, rows, cells }
    }

    /// Writes a band's owned rows back into place.
    pub fn install(
        &mut self,
        rows: &Range<usize>,
        owned: &[Row],
    ) -> Result<(), Error> {
        if rows.end > self.height || owned.len() != rows.len() {
            Err(Error::InvalidWorld(format!(
                "band {:?} with {} rows does not fit {} rows",
                rows,
                owned.len(),
                self.height
            )))?
        }
        for (y, row) in rows.clone().zip(owned) {
            if row.len() != self.width {
                Err(Error::InvalidWorld(format!(
                    "row {y} is {} cells wide, expected {}",
                    row.len(),
                    self.width
                )))?
            }
            self.cells[y * self.width..(y + 1) * self.width]
                .copy_from_slice(row);
        }
        Ok(())
    }

    /// Single band reference step over the whole torus.
    pub fn next_generation(&self) -> World {
        let current = self.band(0, 0..self.height).cells;
        let mut next = current.clone();
        step_band(&current, &mut next);
        let mut world = self.clone();
        for (y, row) in next[1..=self.height].iter().enumerate() {
            world.cells[y * self.width..(y + 1) * self.width]
                .copy_from_slice(row);
        }
        world
    }

    /// Runs `turns` reference steps.
    pub fn advance(&self, turns: u64) -> World {
        (0..turns).fold(self.clone(), |world, _| world.next_generation())
    }
}

/// The standard rule: survive on 2 or 3 neighbours, be born on exactly 3.
pub fn next_cell(current: u8, neighbours: u32) -> u8 {
    match (current == ALIVE, neighbours) {
        (true, 2) | (true, 3) | (false, 3) => ALIVE,
        _ => DEAD,
    }
}

/// Computes the next generation of every owned row of a padded band into
/// `next`. Columns wrap; the padding rows of `next` are left untouched.
pub fn step_band(current: &[Row], next: &mut [Row]) {
    debug_assert_eq!(current.len(), next.len());
    let width = current[0].len();
    for y in 1..current.len() - 1 {
        let (above, row, below) = (&current[y - 1], &current[y], &current[y + 1]);
        for x in 0..width {
            let left = (x + width - 1) % width;
            let right = (x + 1) % width;
            let sum = [
                above[left],
                above[x],
                above[right],
                row[left],
                row[right],
                below[left],
                below[x],
                below[right],
            ]
            .iter()
            .map(|&c| c as u32)
            .sum::<u32>();
            next[y][x] = next_cell(row[x], sum / ALIVE as u32);
        }
    }
}
