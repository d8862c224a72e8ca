use core::fmt;

use super::world::{World, ALIVE};

/// Renders a row of cell bytes as `#` (alive) and `.` (dead).
pub struct CellSlice<'a>(&'a [u8]);

impl<'a> CellSlice<'a> {
    fn new<T>(data: &'a T) -> CellSlice<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        CellSlice(data.as_ref())
    }
}

impl fmt::Display for CellSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &cell in self.0 {
            f.write_str(if cell == ALIVE { "#" } else { "." })?;
        }
        Ok(())
    }
}

impl fmt::Debug for CellSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub trait CellDisplayExt {
    fn cells(&self) -> CellSlice<'_>;
}

impl<T> CellDisplayExt for T
where
    T: ?Sized + AsRef<[u8]>,
{
    fn cells(&self) -> CellSlice<'_> {
        CellSlice::new(self)
    }
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            writeln!(f, "{}", row.cells())?;
        }
        Ok(())
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "World {}x{} ({} alive)",
            self.width(),
            self.height(),
            self.alive_count()
        )?;
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::world::{Cell, DEAD};

    #[test]
    fn renders_rows() {
        assert_eq!([ALIVE, DEAD, ALIVE].cells().to_string(), "#.#");
        let world =
            World::with_alive(3, 2, &[Cell::new(1, 0), Cell::new(2, 1)])
                .unwrap();
        assert_eq!(world.to_string(), ".#.\n..#\n");
    }
}
