use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the evaluator and its worker, readable at any time.
#[derive(Debug, Default)]
pub struct EvaluatorStats {
    admitted: AtomicU64,
    completed: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    nodes_encoded: AtomicU64,
}

/// Device memory allocated by an evaluator, excluding layer parameters.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryUsage {
    /// Bytes of one set of slot buffers.
    pub slot_bytes: usize,
    pub slot_count: usize,
    /// Bytes over all slots.
    pub total_bytes: usize,
}

impl EvaluatorStats {
    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn record_encoded(&self) {
        self.nodes_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn nodes_encoded(&self) -> u64 {
        self.nodes_encoded.load(Ordering::Relaxed)
    }
}

impl MemoryUsage {
    pub fn new(slot_bytes: usize, slot_count: usize) -> Self {
        MemoryUsage {
            slot_bytes,
            slot_count,
            total_bytes: slot_bytes * slot_count,
        }
    }
}

impl Display for EvaluatorStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "EvaluatorStats {{")?;
        writeln!(f, "  admitted:       {:>8}", self.admitted())?;
        writeln!(f, "  completed:      {:>8}", self.completed())?;
        writeln!(f, "  in flight:      {:>8}", self.in_flight())?;
        writeln!(f, "  peak in flight: {:>8}", self.peak_in_flight())?;
        writeln!(f, "  nodes encoded:  {:>8}", self.nodes_encoded())?;
        writeln!(f, "}}")?;
        Ok(())
    }
}
