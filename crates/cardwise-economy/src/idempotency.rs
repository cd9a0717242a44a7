// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded memory of recently committed idempotency keys.

use std::collections::{HashMap, VecDeque};

use cardwise_core::IdempotencyKey;

use crate::transaction::CommitReceipt;

/// FIFO window of the last `capacity` committed keys and their receipts.
///
/// Only successful commits are remembered. A denied confirmation leaves no
/// trace, so retrying it after the balance recovers can still succeed.
#[derive(Debug)]
pub(crate) struct IdempotencyWindow {
    capacity: usize,
    order: VecDeque<IdempotencyKey>,
    receipts: HashMap<IdempotencyKey, CommitReceipt>,
}

impl IdempotencyWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            receipts: HashMap::with_capacity(capacity),
        }
    }

    pub(crate) fn get(&self, key: &IdempotencyKey) -> Option<&CommitReceipt> {
        self.receipts.get(key)
    }

    pub(crate) fn insert(&mut self, receipt: CommitReceipt) {
        let key = receipt.idempotency_key.clone();
        if self.receipts.contains_key(&key) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.receipts.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.receipts.insert(key, receipt);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ActionKind;
    use chrono::Utc;

    fn receipt(key: &str) -> CommitReceipt {
        CommitReceipt {
            receipt_id: format!("r-{key}"),
            user_id: "u1".into(),
            kind: ActionKind::Export,
            cost: 1,
            idempotency_key: key.into(),
            ledger_version: 1,
            credits_remaining: 5,
            exports_remaining: 4,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn remembers_committed_keys() {
        let mut window = IdempotencyWindow::new(4);
        window.insert(receipt("k1"));
        assert_eq!(window.get(&"k1".into()).unwrap().receipt_id, "r-k1");
        assert!(window.get(&"k2".into()).is_none());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut window = IdempotencyWindow::new(2);
        window.insert(receipt("k1"));
        window.insert(receipt("k2"));
        window.insert(receipt("k3"));
        assert_eq!(window.len(), 2);
        assert!(window.get(&"k1".into()).is_none());
        assert!(window.get(&"k2".into()).is_some());
        assert!(window.get(&"k3".into()).is_some());
    }

    #[test]
    fn first_receipt_for_a_key_wins() {
        let mut window = IdempotencyWindow::new(2);
        window.insert(receipt("k1"));
        let mut dup = receipt("k1");
        dup.receipt_id = "other".into();
        window.insert(dup);
        assert_eq!(window.len(), 1);
        assert_eq!(window.get(&"k1".into()).unwrap().receipt_id, "r-k1");
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut window = IdempotencyWindow::new(0);
        window.insert(receipt("k1"));
        assert!(window.get(&"k1".into()).is_some());
    }
}
