//! Pending change queue for one table.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Operation of a table change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    /// Set operation (add or update)
    #[serde(rename = "SET")]
    Set,
    /// Delete operation
    #[serde(rename = "DEL")]
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Del => "DEL",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SET" => Ok(Operation::Set),
            "DEL" => Ok(Operation::Del),
            other => Err(format!("unknown operation {}", other)),
        }
    }
}

/// A field-value pair of a table entry.
pub type FieldValue = (String, String);

/// Key, operation, and field-values of one table change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    /// The key (e.g., "10.0.0.0/24", "Vrf1:10.0.0.0/24")
    pub key: String,
    pub op: Operation,
    /// Field-value pairs (empty for Del operations)
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == field)
    }
}

/// Configuration for a Consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Table name (e.g., "ROUTE_TABLE")
    pub table_name: String,
    /// Priority (lower = higher priority)
    pub priority: i32,
}

impl ConsumerConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Pending entries of one table, grouped by key.
///
/// At most a DEL followed by a SET is kept per key:
/// - a DEL drops everything queued for the key
/// - a SET after a SET merges field values, newer values winning
/// - a SET after a DEL is appended
///
/// Keys are drained in key order; entries for one key in arrival order.
pub struct Consumer {
    config: ConsumerConfig,
    to_sync: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    pending_count: usize,
}

impl Consumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    pub fn add_to_sync(&mut self, entries: Vec<KeyOpFieldsValues>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();

        match entry.op {
            Operation::Del => {
                self.pending_count -= queue.len();
                queue.clear();
                queue.push_back(entry);
                self.pending_count += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        for (field, value) in entry.fvs {
                            if let Some(existing) = last.fvs.iter_mut().find(|(f, _)| *f == field) {
                                existing.1 = value;
                            } else {
                                last.fvs.push((field, value));
                            }
                        }
                        return;
                    }
                }
                queue.push_back(entry);
                self.pending_count += 1;
            }
        }
    }

    /// Drains all pending entries in order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut result = Vec::with_capacity(self.pending_count);

        for (_key, queue) in std::mem::take(&mut self.to_sync) {
            result.extend(queue);
        }

        self.pending_count = 0;
        result
    }

    pub fn peek(&self) -> impl Iterator<Item = &KeyOpFieldsValues> {
        self.to_sync.values().flat_map(|q| q.iter())
    }

    /// Puts an entry back at the front of its key's queue.
    pub fn retry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();
        queue.push_front(entry);
        self.pending_count += 1;
    }

    /// Puts entries back ahead of anything queued since they were drained,
    /// keeping their relative order.
    pub fn retry_all(&mut self, entries: Vec<KeyOpFieldsValues>) {
        for entry in entries.into_iter().rev() {
            self.retry(entry);
        }
    }

    pub fn clear(&mut self) {
        self.to_sync.clear();
        self.pending_count = 0;
    }

    /// Dumps pending entries for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.to_sync
            .iter()
            .flat_map(|(key, queue)| {
                queue
                    .iter()
                    .map(move |e| format!("{}: {} {:?}", key, e.op, e.fvs))
            })
            .collect()
    }
}
