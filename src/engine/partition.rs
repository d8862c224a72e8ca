use std::ops::Range;

use super::error::Error;

/// Contiguous, ordered cut of `0..total` into `parts` ranges.
///
/// The first `parts - total % parts` ranges are "small" (`total / parts`
/// long), the rest are one longer. The same cut is used for rows onto workers
/// and for workers onto client hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    ranges: Vec<Range<usize>>,
}

impl Partition {
    pub fn new(total: usize, parts: usize) -> Result<Self, Error> {
        if parts == 0 || parts > total {
            Err(Error::InvalidPartition { total, parts })?
        }
        let small = parts - total % parts;
        let small_len = total / parts;
        let mut ranges = Vec::with_capacity(parts);
        let mut start = 0;
        for i in 0..parts {
            let len = if i < small { small_len } else { small_len + 1 };
            ranges.push(start..start + len);
            start += len;
        }
        debug_assert_eq!(start, total);
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Range<usize>> {
        self.ranges.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
        self.ranges.iter()
    }

    /// Heights of every part, in order.
    pub fn heights(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }

    /// Total number of items covered.
    pub fn total(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_every_row_once() {
        for total in 1..=40 {
            for parts in 1..=total {
                let partition = Partition::new(total, parts).unwrap();
                assert_eq!(partition.len(), parts);
                assert_eq!(partition.ranges()[0].start, 0);
                assert_eq!(partition.total(), total);
                for pair in partition.ranges().windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                assert_eq!(partition.heights().iter().sum::<usize>(), total);
                assert!(partition.iter().all(|r| !r.is_empty()));
            }
        }
    }

    #[test]
    fn small_bands_come_first() {
        // 16 rows over 10 workers: 4 bands of 1 row then 6 bands of 2
        let partition = Partition::new(16, 10).unwrap();
        assert_eq!(partition.heights(), vec![1, 1, 1, 1, 2, 2, 2, 2, 2, 2]);

        let partition = Partition::new(16, 12).unwrap();
        assert_eq!(
            partition.heights(),
            vec![1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2]
        );
    }

    #[test]
    fn even_split_has_no_large_bands() {
        let partition = Partition::new(16, 4).unwrap();
        assert_eq!(partition.ranges(), &[0..4, 4..8, 8..12, 12..16]);
    }

    #[test]
    fn rejects_impossible_cuts() {
        assert!(matches!(
            Partition::new(16, 0),
            Err(Error::InvalidPartition { total: 16, parts: 0 })
        ));
        assert!(matches!(
            Partition::new(4, 5),
            Err(Error::InvalidPartition { total: 4, parts: 5 })
        ));
    }

    #[test]
    fn workers_onto_clients() {
        // 8 workers across 3 hosts: 2, 3, 3
        let partition = Partition::new(8, 3).unwrap();
        assert_eq!(partition.ranges(), &[0..2, 2..5, 5..8]);
    }
}
