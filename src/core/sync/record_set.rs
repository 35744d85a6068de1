use crate::core::backend::{Change, ChangeKind, Filter, matches_all};
use crate::core::models::{Record, from_row, row_key};

/// Keyed in-memory mirror of one table, optionally narrowed by filters.
#[derive(Debug, Clone)]
pub struct RecordSet<T: Record> {
    rows: Vec<T>,
    filters: Vec<Filter>,
}

impl<T: Record> RecordSet<T> {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self {
            rows: Vec::new(),
            filters,
        }
    }

    /// Replaces the contents with a fresh load, keeping its order.
    pub fn load(&mut self, rows: Vec<T>) {
        self.rows = rows;
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.rows.iter().find(|r| r.key() == key)
    }

    fn remove(&mut self, key: &str) -> bool {
        let before = self.rows.len();
        self.rows.retain(|r| r.key() != key);
        self.rows.len() != before
    }

    fn replace_or_prepend(&mut self, record: T) {
        let key = record.key();
        match self.rows.iter_mut().find(|r| r.key() == key) {
            Some(slot) => *slot = record,
            None => self.rows.insert(0, record),
        }
    }

    /// Applies one change. Returns whether the set changed shape or content.
    pub fn apply(&mut self, change: &Change) -> serde_json::Result<bool> {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(new) = &change.new else {
                    return Ok(false);
                };
                if !matches_all(&self.filters, new) {
                    // An update can move a row out of the filtered view.
                    return Ok(match row_key(new) {
                        Some(key) => self.remove(&key),
                        None => false,
                    });
                }
                let record: T = from_row(new.clone())?;
                self.replace_or_prepend(record);
                Ok(true)
            }
            ChangeKind::Delete => {
                let key = change
                    .old
                    .as_ref()
                    .and_then(row_key)
                    .or_else(|| change.new.as_ref().and_then(row_key));
                Ok(match key {
                    Some(key) => self.remove(&key),
                    None => false,
                })
            }
        }
    }
}
