//! Newest-first singly linked list of partitions.
//!
//! Locking is two-tier: one `RwLock` guards the head/tail pair, and every node guards
//! its own successor pointer. Relinking takes the list lock for writing plus the lock of
//! the single node being rewired, so iterators walking other nodes are not blocked.

use crate::error::DbError;
use crate::partition::{Partition, SharedPartition};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug)]
struct ListNode {
    /// `None` only for an iterator's sentinel node.
    partition: RwLock<Option<SharedPartition>>,
    next: RwLock<Option<Arc<ListNode>>>,
}

impl ListNode {
    fn new(partition: SharedPartition, next: Option<Arc<ListNode>>) -> Self {
        Self {
            partition: RwLock::new(Some(partition)),
            next: RwLock::new(next),
        }
    }

    fn sentinel(next: Option<Arc<ListNode>>) -> Self {
        Self {
            partition: RwLock::new(None),
            next: RwLock::new(next),
        }
    }

    fn holds(&self, target: &SharedPartition) -> Result<bool, DbError> {
        Ok(matches!(&*self.partition.read()?, Some(p) if same_partition(p, target)))
    }

    fn next(&self) -> Result<Option<Arc<ListNode>>, DbError> {
        Ok(self.next.read()?.clone())
    }
}

/// Identity comparison on the data pointer only; vtable pointers are not unique.
fn same_partition(a: &SharedPartition, b: &SharedPartition) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Debug, Default)]
struct Ends {
    head: Option<Arc<ListNode>>,
    tail: Option<Arc<ListNode>>,
}

/// Time-ordered list of partitions; the head is the newest.
#[derive(Debug, Default)]
pub struct PartitionList {
    ends: RwLock<Ends>,
    size: AtomicUsize,
}

impl PartitionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `partition` the new head.
    pub fn insert(&self, partition: SharedPartition) -> Result<(), DbError> {
        let mut ends = self.ends.write()?;
        let node = Arc::new(ListNode::new(partition, ends.head.take()));
        if ends.tail.is_none() {
            ends.tail = Some(Arc::clone(&node));
        }
        ends.head = Some(node);
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Unlinks `target` and cleans it up.
    ///
    /// The removed node keeps its successor pointer, so an iterator currently parked on it
    /// continues into the rest of the list.
    pub fn remove(&self, target: &SharedPartition) -> Result<(), DbError> {
        let removed = {
            let mut ends = self.ends.write()?;
            let mut cursor = ends.head.clone().ok_or(DbError::EmptyPartitionList)?;
            let mut prev: Option<Arc<ListNode>> = None;
            loop {
                if cursor.holds(target)? {
                    let next = cursor.next()?;
                    match &prev {
                        None => ends.head = next.clone(),
                        Some(prev) => *prev.next.write()? = next.clone(),
                    }
                    if next.is_none() {
                        ends.tail = prev;
                    }
                    self.size.fetch_sub(1, Ordering::AcqRel);
                    break cursor;
                }
                match cursor.next()? {
                    Some(next) => {
                        prev = Some(cursor);
                        cursor = next;
                    }
                    None => {
                        return Err(DbError::PartitionNotFound {
                            min_timestamp: target.min_timestamp(),
                        })
                    }
                }
            }
        };

        let partition = removed.partition.read()?.clone();
        match partition {
            Some(p) => p.clean(),
            None => Err(DbError::Internal("removed a node without a partition".to_string())),
        }
    }

    /// Replaces `old` with `new` without moving it.
    pub fn swap(&self, old: &SharedPartition, new: SharedPartition) -> Result<(), DbError> {
        let ends = self.ends.read()?;
        let mut cursor = ends.head.clone().ok_or(DbError::EmptyPartitionList)?;
        loop {
            if cursor.holds(old)? {
                *cursor.partition.write()? = Some(new);
                return Ok(());
            }
            cursor = cursor.next()?.ok_or_else(|| DbError::PartitionNotFound {
                min_timestamp: old.min_timestamp(),
            })?;
        }
    }

    /// The newest partition, if any.
    pub fn head(&self) -> Result<Option<SharedPartition>, DbError> {
        let ends = self.ends.read()?;
        match &ends.head {
            Some(node) => Ok(node.partition.read()?.clone()),
            None => Ok(None),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Walks partitions from newest to oldest.
    pub fn iter(&self) -> Result<PartitionIter, DbError> {
        let head = self.ends.read()?.head.clone();
        Ok(PartitionIter {
            current: Arc::new(ListNode::sentinel(head)),
        })
    }
}

/// Iterator over a [`PartitionList`], newest first.
///
/// It starts on a sentinel whose successor is the head. Nodes are followed through their
/// own locks only, so the list may be relinked while iterating.
#[derive(Debug)]
pub struct PartitionIter {
    current: Arc<ListNode>,
}

impl Iterator for PartitionIter {
    type Item = Result<SharedPartition, DbError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.current.next() {
            Ok(next) => next?,
            Err(e) => return Some(Err(e)),
        };
        self.current = next;
        let partition = match self.current.partition.read() {
            Ok(guard) => guard.clone(),
            Err(e) => return Some(Err(e.into())),
        };
        Some(partition.ok_or_else(|| DbError::Internal("unexpected empty partition found".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPartition;
    use crate::types::{DataPoint, Row, TimestampPrecision};

    fn partition_at(ts: i64) -> SharedPartition {
        let p = MemoryPartition::new(3600, 86400, TimestampPrecision::Seconds);
        p.insert_rows(&[Row::new("m", DataPoint::new(ts, 1.0))]).unwrap();
        Arc::new(p)
    }

    fn mins(list: &PartitionList) -> Vec<i64> {
        list.iter()
            .unwrap()
            .map(|p| p.unwrap().min_timestamp())
            .collect()
    }

    fn list_of(ts: &[i64]) -> (PartitionList, Vec<SharedPartition>) {
        let list = PartitionList::new();
        let parts: Vec<_> = ts.iter().map(|&t| partition_at(t)).collect();
        for p in &parts {
            list.insert(Arc::clone(p)).unwrap();
        }
        (list, parts)
    }

    #[test]
    fn test_insert_makes_newest_head() {
        let (list, parts) = list_of(&[1, 2, 3]);
        assert_eq!(list.size(), 3);
        assert_eq!(mins(&list), vec![3, 2, 1]);
        let head = list.head().unwrap().unwrap();
        assert!(same_partition(&head, &parts[2]));
    }

    #[test]
    fn test_empty_list() {
        let list = PartitionList::new();
        assert!(list.head().unwrap().is_none());
        assert_eq!(list.iter().unwrap().count(), 0);
        let p = partition_at(1);
        assert!(matches!(list.remove(&p), Err(DbError::EmptyPartitionList)));
        assert!(matches!(
            list.swap(&p, partition_at(2)),
            Err(DbError::EmptyPartitionList)
        ));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let (list, parts) = list_of(&[1, 2, 3, 4]);

        list.remove(&parts[3]).unwrap();
        assert_eq!(mins(&list), vec![3, 2, 1]);

        list.remove(&parts[1]).unwrap();
        assert_eq!(mins(&list), vec![3, 1]);

        list.remove(&parts[0]).unwrap();
        assert_eq!(mins(&list), vec![3]);
        assert_eq!(list.size(), 1);

        // Tail was fixed up: inserting and removing keeps the list consistent.
        list.insert(partition_at(5)).unwrap();
        list.remove(&parts[2]).unwrap();
        assert_eq!(mins(&list), vec![5]);

        let last = list.head().unwrap().unwrap();
        list.remove(&last).unwrap();
        assert_eq!(list.size(), 0);
        assert!(list.head().unwrap().is_none());
    }

    #[test]
    fn test_remove_cleans_partition() {
        let (list, parts) = list_of(&[1, 2]);
        list.remove(&parts[0]).unwrap();
        assert!(parts[0].select_data_points("m", &[], 0, 10).unwrap().is_empty());
        assert_eq!(parts[1].select_data_points("m", &[], 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unknown_partition() {
        let (list, _parts) = list_of(&[1, 2]);
        let stranger = partition_at(7);
        assert!(matches!(
            list.remove(&stranger),
            Err(DbError::PartitionNotFound { min_timestamp: 7 })
        ));
        assert_eq!(list.size(), 2);
    }

    #[test]
    fn test_identity_not_min_timestamp() {
        // Two empty partitions share min_timestamp 0 but are distinct.
        let list = PartitionList::new();
        let a: SharedPartition = Arc::new(MemoryPartition::new(1, 1, TimestampPrecision::Seconds));
        let b: SharedPartition = Arc::new(MemoryPartition::new(1, 1, TimestampPrecision::Seconds));
        list.insert(Arc::clone(&a)).unwrap();
        list.insert(Arc::clone(&b)).unwrap();
        list.remove(&a).unwrap();
        assert!(same_partition(&list.head().unwrap().unwrap(), &b));
    }

    #[test]
    fn test_swap_in_place() {
        let (list, parts) = list_of(&[1, 2, 3]);
        list.swap(&parts[1], partition_at(20)).unwrap();
        assert_eq!(mins(&list), vec![3, 20, 1]);
        assert_eq!(list.size(), 3);
        assert!(matches!(
            list.swap(&partition_at(9), partition_at(10)),
            Err(DbError::PartitionNotFound { .. })
        ));
    }

    #[test]
    fn test_iterator_survives_removal_of_current_node() {
        let (list, parts) = list_of(&[1, 2, 3]);
        let mut iter = list.iter().unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.min_timestamp(), 3);

        list.remove(&parts[2]).unwrap();
        let rest: Vec<_> = iter.map(|p| p.unwrap().min_timestamp()).collect();
        assert_eq!(rest, vec![2, 1]);
    }

    #[test]
    fn test_concurrent_insert_and_iterate() {
        let list = Arc::new(PartitionList::new());
        list.insert(partition_at(0)).unwrap();

        let writer = {
            let list = Arc::clone(&list);
            std::thread::spawn(move || {
                for ts in 1..=200 {
                    list.insert(partition_at(ts)).unwrap();
                }
            })
        };
        for _ in 0..50 {
            let seen = mins(&list);
            assert!(seen.windows(2).all(|w| w[0] > w[1]));
        }
        writer.join().unwrap();
        assert_eq!(list.size(), 201);
    }
}
