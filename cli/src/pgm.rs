//! Binary PGM (`P5`) images: one byte per cell, 255 alive and 0 dead.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use torus::engine::{Error, Snapshot, SnapshotSink, World};
use tracing::debug;

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Reads a `width` x `height` world from a P5 image.
pub fn read(path: &Path, width: usize, height: usize) -> Result<World, Error> {
    let bytes = fs::read(path)?;
    let (header, pixels) = parse_header(&bytes)?;
    if header != (width, height) {
        Err(Error::InvalidWorld(format!(
            "{} is {}x{}, expected {}x{}",
            path.display(),
            header.0,
            header.1,
            width,
            height
        )))?
    }
    World::from_bytes(width, height, pixels.to_vec())
}

/// Returns `(width, height)` and the pixel bytes.
fn parse_header(bytes: &[u8]) -> io::Result<((usize, usize), &[u8])> {
    let mut fields = Vec::with_capacity(4);
    let mut pos = 0;
    while fields.len() < 4 {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if start == pos {
            return Err(invalid("truncated header"));
        }
        fields.push(&bytes[start..pos]);
    }
    // exactly one whitespace byte separates the header from the pixels
    pos += 1;

    if fields[0] != b"P5" {
        return Err(invalid("not a binary PGM"));
    }
    let number = |field: &[u8]| -> io::Result<usize> {
        std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| invalid("bad header field"))
    };
    let (width, height, max) =
        (number(fields[1])?, number(fields[2])?, number(fields[3])?);
    if max != 255 {
        return Err(invalid(format!("unsupported maxval {max}")));
    }
    let pixels = bytes
        .get(pos..pos + width * height)
        .ok_or_else(|| invalid("truncated pixels"))?;
    Ok(((width, height), pixels))
}

pub fn write(path: &Path, world: &World) -> io::Result<()> {
    let mut file = io::BufWriter::new(fs::File::create(path)?);
    write!(file, "P5\n{} {}\n255\n", world.width(), world.height())?;
    file.write_all(world.as_bytes())?;
    file.flush()
}

/// Saves snapshots as `<dir>/<name>.pgm`.
pub struct PgmSink {
    dir: PathBuf,
}

impl PgmSink {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, snapshot: &Snapshot) -> PathBuf {
        self.dir.join(format!("{}.pgm", snapshot.name()))
    }
}

impl SnapshotSink for PgmSink {
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        let path = self.path_for(snapshot);
        write(&path, &snapshot.world)?;
        debug!(path = %path.display(), "wrote snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torus::engine::Cell;

    #[test]
    fn parses_headers_with_comments() {
        let bytes = b"P5\n# made by hand\n2 1\n255\n\xff\x00";
        let ((w, h), pixels) = parse_header(bytes).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(pixels, &[0xFF, 0x00]);
        assert!(parse_header(b"P2\n2 1\n255\n..").is_err());
        assert!(parse_header(b"P5\n2 2\n255\n\xff").is_err());
    }

    #[test]
    fn sink_writes_readable_images() {
        let dir = std::env::temp_dir()
            .join(format!("torus-pgm-{}", std::process::id()));
        let mut sink = PgmSink::new(dir.clone()).unwrap();
        let world =
            World::with_alive(4, 3, &[Cell::new(0, 0), Cell::new(3, 2)])
                .unwrap();
        let snapshot = Snapshot { turn: 7, world };
        sink.save(&snapshot).unwrap();

        let path = dir.join("4x3_state_7.pgm");
        assert_eq!(sink.path_for(&snapshot), path);
        assert_eq!(read(&path, 4, 3).unwrap(), snapshot.world);
        assert!(read(&path, 3, 4).is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
