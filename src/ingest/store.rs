//! MetricStore — the aggregation table shared by every UDP reader thread.
//!
//! A single [`std::sync::Mutex`] guards a [`BTreeMap`] keyed by kind and
//! name. Flush walks the whole map under one lock acquisition so every cell
//! it emits reflects the same point in time: a consistent per-cell snapshot,
//! not a running tally that could shift mid-flush. This deliberately forgoes
//! a sharded `DashMap` — that sharding exists to spread *write* contention
//! across a hot multi-producer client; here the store is read and drained by
//! one flush loop, so a single mutex is the simpler structure that still
//! satisfies the invariant.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::parser::MetricKind;

/// Maximum metric name length kept in the store, mirroring collectd's
/// `DATA_MAX_NAME_LEN` (`src/statsd.c`). Longer names are clamped to this
/// many bytes for the purposes of the key; the original line is still what
/// gets logged on a parse failure, so no diagnostic information is lost.
pub const MAX_NAME_LEN: usize = 63;

/// The key identifying one aggregation cell: a metric kind plus name.
/// `Ord` is derived so the store can use a [`BTreeMap`]; iteration order is
/// therefore lexicographic by kind tag then name, which is also collectd's
/// AVL-tree iteration order for its `"c:name"`-style keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellKey {
    kind: MetricKind,
    name: Box<str>,
}

impl CellKey {
    /// Builds a key, clamping `name` to [`MAX_NAME_LEN`] bytes at a char
    /// boundary.
    #[must_use]
    pub fn new(kind: MetricKind, name: &str) -> Self {
        let clamped = if name.len() > MAX_NAME_LEN {
            let mut end = MAX_NAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            &name[..end]
        } else {
            name
        };
        Self {
            kind,
            name: clamped.into(),
        }
    }

    /// The metric kind this key names.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    /// The (possibly clamped) metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One aggregation cell. The variant always matches the owning key's kind.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Fractional residual plus the monotonic total emitted last flush.
    Counter {
        /// Unflushed fractional accumulation, rounded and folded into
        /// `total` at each flush.
        residual: f64,
        /// Running total of whole units ever flushed.
        total: i64,
        /// Updates received since the last flush.
        updates: u64,
    },
    /// A latency histogram, lazily created on first update.
    Timer {
        /// `None` until the first sample arrives.
        latency: Option<super::histogram::LatencyHistogram>,
        /// Updates received since the last flush.
        updates: u64,
    },
    /// The current value, set absolutely or nudged by a delta.
    Gauge {
        /// Current value.
        value: f64,
        /// Updates received since the last flush.
        updates: u64,
    },
    /// Set membership for the current flush interval.
    Set {
        /// Member strings seen this interval; `None` once cleared.
        members: Option<BTreeSet<Box<str>>>,
        /// Updates received since the last flush.
        updates: u64,
    },
}

impl Cell {
    fn new_for(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter {
                residual: 0.0,
                total: 0,
                updates: 0,
            },
            MetricKind::Timer => Self::Timer {
                latency: None,
                updates: 0,
            },
            MetricKind::Gauge => Self::Gauge {
                value: 0.0,
                updates: 0,
            },
            MetricKind::Set => Self::Set {
                members: None,
                updates: 0,
            },
        }
    }
}

/// What to do with a cell once its flush measurements have been taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// Keep the cell in the store for the next interval.
    Keep,
    /// Remove the cell entirely — used for idle counters/timers/sets/gauges
    /// under a delete-on-idle policy.
    Delete,
}

/// The shared aggregation table.
#[derive(Debug, Default)]
pub struct MetricStore {
    cells: Mutex<BTreeMap<CellKey, Cell>>,
}

impl MetricStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(BTreeMap::new()),
        }
    }

    /// Looks up the cell for `(kind, name)`, creating it on first access,
    /// and runs `f` against it while holding the lock.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned, i.e. another thread
    /// panicked while holding it.
    pub fn update<R>(&self, kind: MetricKind, name: &str, f: impl FnOnce(&mut Cell) -> R) -> R {
        let mut cells = self.cells.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = CellKey::new(kind, name);
        let cell = cells.entry(key).or_insert_with(|| Cell::new_for(kind));
        f(cell)
    }

    /// Walks every cell under a single lock acquisition, invoking `f` with
    /// each key and cell. `f` returns a [`FlushAction`] deciding whether the
    /// cell survives the flush; cells marked [`FlushAction::Delete`] are
    /// removed in a second pass after iteration completes, mirroring
    /// collectd's `to_be_deleted` list in `statsd_read`.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn drain_for_flush(&self, mut f: impl FnMut(&CellKey, &mut Cell) -> FlushAction) {
        let mut cells = self.cells.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut to_delete = Vec::new();
        for (key, cell) in cells.iter_mut() {
            if f(key, cell) == FlushAction::Delete {
                to_delete.push(key.clone());
            }
        }
        for key in to_delete {
            cells.remove(&key);
        }
    }

    /// Number of cells currently tracked, across all kinds. Test/diagnostic
    /// helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// `true` if no cells are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
