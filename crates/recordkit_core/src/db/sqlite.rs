//! SQLite implementation of the storage collaborator.

use super::{Row, Storage, StorageResult, StoredValue, FOUND_ROWS_HINT};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use std::cell::Cell;

/// `Storage` adapter over one rusqlite connection.
///
/// Queries carrying `FOUND_ROWS_HINT` get the hint stripped and a
/// companion `COUNT(*)` over the query without its trailing `LIMIT`.
pub struct SqliteStorage {
    conn: Connection,
    found_rows: Cell<Option<u64>>,
}

impl SqliteStorage {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            found_rows: Cell::new(None),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_rows(&self, sql: &str, params: &[StoredValue]) -> StorageResult<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Row::new();
            for (index, column) in columns.iter().enumerate() {
                values.insert(column.clone(), stored_from_ref(row.get_ref(index)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    fn count_rows(&self, sql: &str, params: &[StoredValue]) -> StorageResult<u64> {
        let base = match sql.rfind(" LIMIT ") {
            Some(position) => &sql[..position],
            None => sql,
        };
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM ({base})"),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl Storage for SqliteStorage {
    fn execute_one(&self, sql: &str, params: &[StoredValue]) -> StorageResult<Option<Row>> {
        Ok(self.execute_all(sql, params)?.into_iter().next())
    }

    fn execute_all(&self, sql: &str, params: &[StoredValue]) -> StorageResult<Vec<Row>> {
        debug!("event=storage_query module=db status=start kind=select");
        match strip_found_rows_hint(sql) {
            Some(stripped) => {
                let rows = self.query_rows(&stripped, params)?;
                let total = self.count_rows(&stripped, params)?;
                self.found_rows.set(Some(total));
                Ok(rows)
            }
            None => self.query_rows(sql, params),
        }
    }

    fn execute_non_query(&self, sql: &str, params: &[StoredValue]) -> StorageResult<u64> {
        debug!("event=storage_query module=db status=start kind=statement");
        let changed = self.conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn escape(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    fn found_row_count(&self) -> Option<u64> {
        self.found_rows.get()
    }
}

fn strip_found_rows_hint(sql: &str) -> Option<String> {
    let trimmed = sql.trim_start();
    let rest = trimmed.strip_prefix("SELECT ")?.trim_start();
    let rest = rest.strip_prefix(FOUND_ROWS_HINT)?;
    Some(format!("SELECT{rest}"))
}

fn stored_from_ref(value: ValueRef<'_>) -> StoredValue {
    match value {
        ValueRef::Null => StoredValue::Null,
        ValueRef::Integer(number) => StoredValue::Integer(number),
        ValueRef::Real(number) => StoredValue::Real(number),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            StoredValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::strip_found_rows_hint;

    #[test]
    fn strips_found_rows_hint_only_when_present() {
        assert_eq!(
            strip_found_rows_hint("SELECT SQL_CALC_FOUND_ROWS \"t\".* FROM t").as_deref(),
            Some("SELECT \"t\".* FROM t")
        );
        assert!(strip_found_rows_hint("SELECT * FROM t").is_none());
    }
}
