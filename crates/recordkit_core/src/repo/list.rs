use crate::query::{Conditions, Order};
use crate::record::Record;

/// Options for multi-row loaders.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub order: Order,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Key the result by this field's stored text.
    pub index_field: Option<String>,
    /// `None` means "on whenever a limit is set".
    pub calc_found_rows: Option<bool>,
    /// Raw select expressions appended after `<alias>.*`.
    pub extra_columns: Vec<String>,
    pub having: Conditions,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn index_field(mut self, field: impl Into<String>) -> Self {
        self.index_field = Some(field.into());
        self
    }

    pub fn calc_found_rows(mut self, enabled: bool) -> Self {
        self.calc_found_rows = Some(enabled);
        self
    }

    pub fn extra_column(mut self, expression: impl Into<String>) -> Self {
        self.extra_columns.push(expression.into());
        self
    }

    pub fn having(mut self, having: Conditions) -> Self {
        self.having = having;
        self
    }

    pub(crate) fn wants_found_rows(&self) -> bool {
        self.calc_found_rows.unwrap_or(self.limit.is_some())
    }
}

/// Records returned by a multi-row loader.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    pub records: Vec<Record>,
    /// Index keys parallel to `records` when an index field was requested.
    pub keys: Option<Vec<String>>,
    /// Total matching rows ignoring the limit, when requested.
    pub found_rows: Option<u64>,
}

impl RecordList {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Record stored under `key` in an indexed result.
    pub fn by_key(&self, key: &str) -> Option<&Record> {
        let keys = self.keys.as_ref()?;
        let position = keys.iter().position(|candidate| candidate == key)?;
        self.records.get(position)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for RecordList {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
