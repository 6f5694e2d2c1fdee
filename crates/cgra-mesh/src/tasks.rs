//! Boundary feed-in and collect tasks.
//!
//! A feed-in task pushes one token per boundary port per round; a collect
//! task pulls one token per port per round into its output buffer. A task is
//! finished once `round * stride` covers its data, after which the driver
//! discards (feeds) or parks (collects, whose output outlives the run) it.

use cgra_core::{Color, Data, Side};

/// Feeds `data` into a range of boundary ports, one token per port per
/// round.
#[derive(Debug)]
pub struct FeedTask {
    pub(crate) data: Vec<u32>,
    pub(crate) side: Side,
    /// Driver-side port names in range order.
    pub(crate) ports: Vec<String>,
    /// Tile-side destination port names, parallel to `ports`.
    pub(crate) peers: Vec<String>,
    pub(crate) stride: usize,
    pub(crate) color: Color,
    pub(crate) round: usize,
}

impl FeedTask {
    /// Token index for port `i` of the current round.
    pub(crate) fn data_index(&self, i: usize) -> usize {
        self.round * self.stride + i
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.round * self.stride >= self.data.len()
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn rounds_run(&self) -> usize {
        self.round
    }
}

/// Collects tokens from a range of boundary ports into an output buffer.
#[derive(Debug)]
pub struct CollectTask {
    pub(crate) out: Vec<Option<Data>>,
    pub(crate) side: Side,
    pub(crate) ports: Vec<String>,
    pub(crate) stride: usize,
    pub(crate) color: Color,
    pub(crate) round: usize,
}

impl CollectTask {
    pub(crate) fn slot_index(&self, i: usize) -> usize {
        self.round * self.stride + i
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.round * self.stride >= self.out.len()
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn color(&self) -> Color {
        self.color
    }

    /// Collected tokens so far, indexed as `round * stride + port`.
    #[must_use]
    pub fn output(&self) -> &[Option<Data>] {
        &self.out
    }

    /// First-lane values of the collected tokens, zero where nothing
    /// arrived.
    #[must_use]
    pub fn values(&self) -> Vec<u32> {
        self.out
            .iter()
            .map(|slot| slot.as_ref().map_or(0, Data::first))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(len: usize, ports: usize, stride: usize) -> FeedTask {
        FeedTask {
            data: (0..len as u32).collect(),
            side: Side::West,
            ports: (0..ports).map(|i| format!("driver.West[{i}]")).collect(),
            peers: (0..ports).map(|i| format!("tile(0,{i}).West")).collect(),
            stride,
            color: Color::R,
            round: 0,
        }
    }

    #[test]
    fn finish_rule() {
        let mut task = feed(6, 1, 1);
        for round in 0..6 {
            assert!(!task.finished(), "round {round}");
            task.round += 1;
        }
        assert!(task.finished());
    }

    #[test]
    fn strided_indexing() {
        let task = FeedTask {
            round: 3,
            ..feed(16, 2, 2)
        };
        assert_eq!(task.data_index(0), 6);
        assert_eq!(task.data_index(1), 7);
    }

    #[test]
    fn collect_values_default_to_zero() {
        let task = CollectTask {
            out: vec![Some(Data::scalar(5)), None],
            side: Side::East,
            ports: vec!["driver.East[0]".into()],
            stride: 1,
            color: Color::R,
            round: 1,
        };
        assert_eq!(task.values(), vec![5, 0]);
    }
}
