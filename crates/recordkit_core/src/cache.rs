//! Point-lookup row cache keyed by unique/primary fields.
//!
//! # Invariants
//! - Keys are `table/field` (coarse) or `table/field:value` (point).
//! - Invalidating a coarse key also drops every point key beneath it.
//! - Only found rows are cached; misses always reach the loader.

use crate::db::Row;
use log::debug;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct RecordCache {
    entries: RwLock<BTreeMap<String, Row>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coarse_key(table: &str, field: &str) -> String {
        format!("{table}/{field}")
    }

    pub fn point_key(table: &str, field: &str, value: &str) -> String {
        format!("{table}/{field}:{value}")
    }

    /// Cached row for `key`, or the loader's result (cached when found).
    pub fn get_cached<E>(
        &self,
        key: &str,
        loader: impl FnOnce() -> Result<Option<Row>, E>,
    ) -> Result<Option<Row>, E> {
        if let Some(row) = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            debug!("event=cache_lookup module=cache status=hit");
            return Ok(Some(row.clone()));
        }

        let loaded = loader()?;
        if let Some(row) = &loaded {
            self.entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key.to_string(), row.clone());
        }
        debug!("event=cache_lookup module=cache status=miss");
        Ok(loaded)
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(key);

        let prefix = format!("{key}:");
        let stale: Vec<String> = entries
            .range(prefix.clone()..)
            .take_while(|(candidate, _)| candidate.starts_with(&prefix))
            .map(|(candidate, _)| candidate.clone())
            .collect();
        for candidate in stale {
            entries.remove(&candidate);
        }
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::RecordCache;
    use crate::db::{Row, StoredValue};
    use std::convert::Infallible;

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("Name".to_string(), StoredValue::text(name));
        row
    }

    #[test]
    fn loader_runs_once_for_found_rows() {
        let cache = RecordCache::new();
        let key = RecordCache::point_key("people", "Email", "a@b.co");
        let mut calls = 0;
        for _ in 0..2 {
            let found = cache
                .get_cached::<Infallible>(&key, || {
                    calls += 1;
                    Ok(Some(row("Ada")))
                })
                .expect("infallible");
            assert_eq!(found, Some(row("Ada")));
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn misses_are_not_cached() {
        let cache = RecordCache::new();
        let _ = cache.get_cached::<Infallible>("people/ID:1", || Ok(None));
        assert!(cache.is_empty());
    }

    #[test]
    fn coarse_invalidation_drops_point_keys_only_under_prefix() {
        let cache = RecordCache::new();
        let _ = cache.get_cached::<Infallible>("people/Email:a", || Ok(Some(row("A"))));
        let _ = cache.get_cached::<Infallible>("people/Email:b", || Ok(Some(row("B"))));
        let _ = cache.get_cached::<Infallible>("people/EmailAlt:c", || Ok(Some(row("C"))));
        let _ = cache.get_cached::<Infallible>("people/ID:1", || Ok(Some(row("D"))));

        cache.invalidate(&RecordCache::coarse_key("people", "Email"));
        assert_eq!(cache.len(), 2);
    }
}
