use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Entry was created; the request may be written.
    Inserted,
    /// A live entry already holds this id; the waiter is handed back.
    DuplicateId,
}

/// A pending call answered by its status reply.
#[derive(Debug)]
pub struct Completed<W> {
    pub waiter: W,
    pub issued_at: Instant,
}

/// A pending call dropped because nobody answered before its deadline.
#[derive(Debug)]
pub struct Expired<W> {
    pub id: u32,
    pub waiter: W,
}

#[derive(Debug)]
struct PendingEntry<W> {
    waiter: W,
    issued_at: Instant,
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DeadlineItem {
    deadline: Instant,
    id: u32,
}

/// Correlation id -> reply slot, with per-entry expiry.
///
/// Ids handed out by [`CorrelationTable::next_id`] increase strictly within a session and
/// never collide with a live entry.
#[derive(Debug)]
pub struct CorrelationTable<W> {
    last_id: u32,
    entries: HashMap<u32, PendingEntry<W>>,
    deadlines: BinaryHeap<Reverse<DeadlineItem>>,
}

impl<W> Default for CorrelationTable<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> CorrelationTable<W> {
    pub fn new() -> Self {
        Self {
            last_id: 0,
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Next session id. Zero is reserved for "unset".
    pub fn next_id(&mut self) -> u32 {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != 0 && !self.entries.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }

    pub fn insert(
        &mut self,
        id: u32,
        waiter: W,
        now: Instant,
        ttl: Duration,
    ) -> (InsertOutcome, Option<W>) {
        if self.entries.contains_key(&id) {
            return (InsertOutcome::DuplicateId, Some(waiter));
        }
        let deadline = now + ttl;
        self.entries.insert(
            id,
            PendingEntry {
                waiter,
                issued_at: now,
                deadline,
            },
        );
        self.deadlines.push(Reverse(DeadlineItem { deadline, id }));
        (InsertOutcome::Inserted, None)
    }

    /// Remove and return the entry for `id`, if it is still live.
    pub fn complete(&mut self, id: u32) -> Option<Completed<W>> {
        self.entries.remove(&id).map(|entry| Completed {
            waiter: entry.waiter,
            issued_at: entry.issued_at,
        })
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(item)) = self.deadlines.peek().copied() {
            match self.entries.get(&item.id) {
                Some(entry) if entry.deadline == item.deadline => return Some(item.deadline),
                _ => {
                    // Stale heap item (entry already completed).
                    let _ = self.deadlines.pop();
                }
            }
        }
        None
    }

    pub fn expire_due(&mut self, now: Instant) -> Vec<Expired<W>> {
        let mut out = Vec::new();
        while let Some(Reverse(item)) = self.deadlines.peek().copied() {
            if item.deadline > now {
                break;
            }
            let _ = self.deadlines.pop();

            let live = matches!(
                self.entries.get(&item.id),
                Some(entry) if entry.deadline == item.deadline
            );
            if !live {
                continue;
            }
            if let Some(entry) = self.entries.remove(&item.id) {
                out.push(Expired {
                    id: item.id,
                    waiter: entry.waiter,
                });
            }
        }
        out
    }

    /// Empty the table, returning every waiter in id order.
    pub fn drain(&mut self) -> Vec<(u32, W)> {
        self.deadlines.clear();
        let mut out: Vec<(u32, W)> = self
            .entries
            .drain()
            .map(|(id, entry)| (id, entry.waiter))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[test]
    fn assigned_ids_are_distinct_and_increasing() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        let mut previous = 0;
        for n in 0..100 {
            let id = table.next_id();
            assert!(id > previous);
            previous = id;
            assert_eq!(table.insert(id, n, now, TTL), (InsertOutcome::Inserted, None));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn next_id_skips_ids_taken_by_callers() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        assert_eq!(table.insert(1, 10, now, TTL).0, InsertOutcome::Inserted);
        assert_eq!(table.insert(2, 20, now, TTL).0, InsertOutcome::Inserted);
        assert_eq!(table.next_id(), 3);
    }

    #[test]
    fn duplicate_live_id_is_rejected_without_touching_the_entry() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        assert_eq!(table.insert(7, 1, now, TTL), (InsertOutcome::Inserted, None));
        assert_eq!(
            table.insert(7, 2, now, TTL),
            (InsertOutcome::DuplicateId, Some(2))
        );
        let done = table.complete(7).expect("entry exists");
        assert_eq!(done.waiter, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn completion_out_of_order_leaves_other_entries() {
        let mut table = CorrelationTable::<&'static str>::new();
        let now = Instant::now();
        table.insert(1, "first", now, TTL);
        table.insert(2, "second", now, TTL);

        assert_eq!(table.complete(2).map(|c| c.waiter), Some("second"));
        assert!(table.contains(1));
        assert!(table.complete(2).is_none());
        assert_eq!(table.complete(1).map(|c| c.waiter), Some("first"));
    }

    #[test]
    fn expiry_removes_only_due_entries() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        table.insert(1, 1, now, Duration::from_millis(10));
        table.insert(2, 2, now, Duration::from_secs(60));

        let expired = table.expire_due(now + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, 1);
        assert_eq!(expired[0].waiter, 1);
        assert!(table.contains(2));
        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn completed_entries_leave_no_deadline_behind() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        table.insert(5, 5, now, TTL);
        assert!(table.complete(5).is_some());
        assert!(table.next_deadline().is_none());
        assert!(table.expire_due(now + TTL * 2).is_empty());
    }

    #[test]
    fn id_can_be_reused_after_completion() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        table.insert(9, 1, now, TTL);
        table.complete(9);
        assert_eq!(table.insert(9, 2, now, TTL), (InsertOutcome::Inserted, None));
    }

    #[test]
    fn drain_returns_everything_in_id_order() {
        let mut table = CorrelationTable::<u32>::new();
        let now = Instant::now();
        table.insert(3, 30, now, TTL);
        table.insert(1, 10, now, TTL);
        table.insert(2, 20, now, TTL);
        assert_eq!(table.drain(), vec![(1, 10), (2, 20), (3, 30)]);
        assert!(table.is_empty());
        assert!(table.next_deadline().is_none());
    }
}
