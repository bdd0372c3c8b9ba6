//! SQLite-backed fiscal number store.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::document::DocumentType;

use super::{AllocationError, FiscalNumber, FiscalNumberStore, NumberKey};

/// SQLite-backed fiscal number store.
pub struct SqliteFiscalNumberStore {
    conn: Mutex<Connection>,
}

impl SqliteFiscalNumberStore {
    /// Open (and create if needed) the store at `path`.
    pub fn new(path: &Path) -> Result<Self, AllocationError> {
        let conn = Connection::open(path).map_err(|e| AllocationError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AllocationError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, AllocationError> {
        let conn =
            Connection::open_in_memory().map_err(|e| AllocationError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AllocationError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fiscal_numbers (
                namespace TEXT NOT NULL,
                taxpayer_id TEXT NOT NULL,
                document_type TEXT NOT NULL,
                serie TEXT NOT NULL,
                numero INTEGER NOT NULL,
                version INTEGER NOT NULL,
                UNIQUE (namespace, taxpayer_id, document_type)
            );
            "#,
        )
        .map_err(|e| AllocationError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_number(row: &rusqlite::Row) -> rusqlite::Result<FiscalNumber> {
        let type_str: String = row.get(2)?;
        let document_type = type_str
            .parse::<DocumentType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

        Ok(FiscalNumber {
            namespace: row.get(0)?,
            taxpayer_id: row.get(1)?,
            document_type,
            serie: row.get(3)?,
            numero: row.get(4)?,
            version: row.get(5)?,
        })
    }
}

impl FiscalNumberStore for SqliteFiscalNumberStore {
    fn find(&self, key: &NumberKey) -> Result<Option<FiscalNumber>, AllocationError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT namespace, taxpayer_id, document_type, serie, numero, version \
             FROM fiscal_numbers WHERE namespace = ? AND taxpayer_id = ? AND document_type = ?",
            params![key.namespace, key.taxpayer_id, key.document_type.as_str()],
            Self::row_to_number,
        )
        .optional()
        .map_err(|e| AllocationError::Database(e.to_string()))
    }

    fn insert_first(&self, number: &FiscalNumber) -> Result<bool, AllocationError> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn
            .execute(
                "INSERT INTO fiscal_numbers (namespace, taxpayer_id, document_type, serie, numero, version) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (namespace, taxpayer_id, document_type) DO NOTHING",
                params![
                    number.namespace,
                    number.taxpayer_id,
                    number.document_type.as_str(),
                    number.serie,
                    number.numero,
                    number.version,
                ],
            )
            .map_err(|e| AllocationError::Database(e.to_string()))?;

        Ok(inserted == 1)
    }

    fn compare_and_set(
        &self,
        key: &NumberKey,
        expected_version: u32,
        numero: u32,
    ) -> Result<bool, AllocationError> {
        let conn = self.conn.lock().unwrap();

        let updated = conn
            .execute(
                "UPDATE fiscal_numbers SET numero = ?, version = version + 1 \
                 WHERE namespace = ? AND taxpayer_id = ? AND document_type = ? AND version = ?",
                params![
                    numero,
                    key.namespace,
                    key.taxpayer_id,
                    key.document_type.as_str(),
                    expected_version,
                ],
            )
            .map_err(|e| AllocationError::Database(e.to_string()))?;

        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NumberKey {
        NumberKey::new("acme", "20123456789", DocumentType::Invoice)
    }

    #[test]
    fn test_insert_first_once() {
        let store = SqliteFiscalNumberStore::in_memory().unwrap();
        let first = FiscalNumber::first(&key(), "F001");

        assert!(store.insert_first(&first).unwrap());
        assert!(!store.insert_first(&first).unwrap());
        assert_eq!(store.find(&key()).unwrap(), Some(first));
    }

    #[test]
    fn test_compare_and_set_checks_version() {
        let store = SqliteFiscalNumberStore::in_memory().unwrap();
        store.insert_first(&FiscalNumber::first(&key(), "F001")).unwrap();

        assert!(store.compare_and_set(&key(), 1, 2).unwrap());
        assert!(!store.compare_and_set(&key(), 1, 2).unwrap());

        let current = store.find(&key()).unwrap().unwrap();
        assert_eq!(current.numero, 2);
        assert_eq!(current.version, 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = SqliteFiscalNumberStore::in_memory().unwrap();
        let other = NumberKey::new("acme", "20123456789", DocumentType::CreditNote);
        store.insert_first(&FiscalNumber::first(&key(), "F001")).unwrap();

        assert!(store.find(&other).unwrap().is_none());
        assert!(store.insert_first(&FiscalNumber::first(&other, "FC01")).unwrap());
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("numbers.db");

        {
            let store = SqliteFiscalNumberStore::new(&db_path).unwrap();
            store.insert_first(&FiscalNumber::first(&key(), "F001")).unwrap();
        }

        let reopened = SqliteFiscalNumberStore::new(&db_path).unwrap();
        assert_eq!(reopened.find(&key()).unwrap().unwrap().numero, 1);
    }
}
