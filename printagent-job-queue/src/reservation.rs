//! In-flight claims on job identifiers.

use std::collections::HashSet;

/// Job ids currently printing, plus printed ids the journal does not hold yet.
///
/// An id lives in at most one of the two sets. Callers guard the table with
/// a single lock so check-and-reserve is atomic.
#[derive(Debug, Default)]
pub struct ReservationTable {
    in_flight: HashSet<i64>,
    printed: HashSet<i64>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_in_flight(&self, job_id: i64) -> bool {
        self.in_flight.contains(&job_id)
    }

    #[inline]
    pub fn is_printed(&self, job_id: i64) -> bool {
        self.printed.contains(&job_id)
    }

    /// Claim `job_id`. Fails if it is already in flight.
    pub fn try_reserve(&mut self, job_id: i64) -> bool {
        if self.in_flight.contains(&job_id) {
            return false;
        }
        self.printed.remove(&job_id);
        self.in_flight.insert(job_id)
    }

    /// Release after a successful print and remember the id as printed
    /// until its journal row is written.
    pub fn complete(&mut self, job_id: i64) {
        self.in_flight.remove(&job_id);
        self.printed.insert(job_id);
    }

    /// The journal row for `job_id` exists; it answers from now on.
    pub fn persisted(&mut self, job_id: i64) {
        self.printed.remove(&job_id);
    }

    /// Release after a failed print so a redelivery can retry.
    pub fn release(&mut self, job_id: i64) {
        self.in_flight.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_exclusive() {
        let mut table = ReservationTable::new();
        assert!(table.try_reserve(7));
        assert!(!table.try_reserve(7));
        assert!(table.is_in_flight(7));
        assert!(!table.is_printed(7));
    }

    #[test]
    fn complete_moves_to_printed() {
        let mut table = ReservationTable::new();
        table.try_reserve(7);
        table.complete(7);
        assert!(!table.is_in_flight(7));
        assert!(table.is_printed(7));
    }

    #[test]
    fn release_allows_retry() {
        let mut table = ReservationTable::new();
        table.try_reserve(7);
        table.release(7);
        assert!(!table.is_printed(7));
        assert!(table.try_reserve(7));
    }

    #[test]
    fn persisted_ids_leave_memory() {
        let mut table = ReservationTable::new();
        table.try_reserve(7);
        table.complete(7);
        table.persisted(7);
        assert!(!table.is_printed(7));
        assert!(!table.is_in_flight(7));
    }
}
