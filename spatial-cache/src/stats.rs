//! Access and size counters of a grid index.

use std::fmt;

/// Counters maintained by the index.
///
/// `reads` and `writes` count storage round-trips and ignore the resident
/// root. `node_count` includes the root; `data_count` is the number of
/// entries currently indexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub reads: u64,
    pub writes: u64,
    pub node_count: u64,
    pub data_count: u64,
}

impl Statistics {
    /// Counters of a freshly created index holding only its root.
    pub fn with_root() -> Self {
        Statistics {
            node_count: 1,
            ..Default::default()
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reads = {} ; Writes = {} ; Nodes = {} ; Data = {}",
            self.reads, self.writes, self.node_count, self.data_count
        )
    }
}
