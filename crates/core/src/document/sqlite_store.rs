//! SQLite-backed document store implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Document, DocumentError, DocumentFilter, DocumentStatus, DocumentStore, DocumentUpdate,
    NewDocument,
};

const COLUMNS: &str = "id, namespace_id, file_ref, cdr_ref, status, retries, last_error, ticket, \
     scheduled_at, created_at, ticket_polls, ambiguous, claimed_by, claimed_at, updated_at";

/// SQLite-backed document store.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Create a new SQLite document store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, DocumentError> {
        let conn = Connection::open(path).map_err(|e| DocumentError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| DocumentError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite document store (useful for testing).
    pub fn in_memory() -> Result<Self, DocumentError> {
        let conn =
            Connection::open_in_memory().map_err(|e| DocumentError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), DocumentError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                namespace_id TEXT NOT NULL,
                file_ref TEXT NOT NULL,
                cdr_ref TEXT,
                status TEXT NOT NULL,
                retries INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                ticket TEXT,
                scheduled_at TEXT,
                created_at TEXT NOT NULL,
                ticket_polls INTEGER NOT NULL DEFAULT 0,
                ambiguous INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                claimed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_due ON documents(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_documents_namespace ON documents(namespace_id);
            "#,
        )
        .map_err(|e| DocumentError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &DocumentFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref namespace_id) = filter.namespace_id {
            conditions.push("namespace_id = ?");
            params.push(Box::new(namespace_id.clone()));
        }

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        match filter.claimed {
            Some(true) => conditions.push("claimed_by IS NOT NULL"),
            Some(false) => conditions.push("claimed_by IS NULL"),
            None => {}
        }

        if let Some(before) = filter.claimed_before {
            conditions.push("claimed_by IS NOT NULL AND claimed_at <= ?");
            params.push(Box::new(db_time(&before)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        let status_str: String = row.get(4)?;
        let status = status_str
            .parse::<DocumentStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;

        Ok(Document {
            id: row.get(0)?,
            namespace_id: row.get(1)?,
            file_ref: row.get(2)?,
            cdr_ref: row.get(3)?,
            status,
            retries: row.get(5)?,
            last_error: row.get(6)?,
            ticket: row.get(7)?,
            scheduled_at: row
                .get::<_, Option<String>>(8)?
                .map(|s| parse_time(8, &s))
                .transpose()?,
            created_at: parse_time(9, &row.get::<_, String>(9)?)?,
            ticket_polls: row.get(10)?,
            ambiguous: row.get(11)?,
            claimed_by: row.get(12)?,
            claimed_at: row
                .get::<_, Option<String>>(13)?
                .map(|s| parse_time(13, &s))
                .transpose()?,
            updated_at: parse_time(14, &row.get::<_, String>(14)?)?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<Document>, DocumentError> {
        conn.query_row(
            &format!("SELECT {} FROM documents WHERE id = ?", COLUMNS),
            params![id],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| DocumentError::Database(e.to_string()))
    }
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so text comparison orders them.
pub(crate) fn db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl DocumentStore for SqliteDocumentStore {
    fn create(&self, request: NewDocument) -> Result<Document, DocumentError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO documents (id, namespace_id, file_ref, status, retries, created_at, ticket_polls, ambiguous, updated_at) VALUES (?, ?, ?, ?, 0, ?, 0, 0, ?)",
            params![
                id,
                request.namespace_id,
                request.file_ref,
                DocumentStatus::Created.as_str(),
                db_time(&now),
                db_time(&now),
            ],
        )
        .map_err(|e| DocumentError::Database(e.to_string()))?;

        Self::fetch(&conn, &id)?.ok_or(DocumentError::NotFound(id))
    }

    fn get(&self, id: &str) -> Result<Option<Document>, DocumentError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    fn list(&self, filter: &DocumentFilter) -> Result<Vec<Document>, DocumentError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM documents {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_document)
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DocumentError::Database(e.to_string()))
    }

    fn count(&self, filter: &DocumentFilter) -> Result<i64, DocumentError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM documents {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| DocumentError::Database(e.to_string()))
    }

    fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Document>, DocumentError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM documents \
             WHERE claimed_by IS NULL \
               AND status IN ('created', 'scheduled_retry', 'sent_awaiting_ticket') \
               AND (scheduled_at IS NULL OR scheduled_at <= ?) \
             ORDER BY COALESCE(scheduled_at, created_at) ASC \
             LIMIT ?",
            COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DocumentError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![db_time(&now), limit], Self::row_to_document)
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| DocumentError::Database(e.to_string()))
    }

    fn claim(
        &self,
        id: &str,
        claim_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, DocumentError> {
        let conn = self.conn.lock().unwrap();
        let now_str = db_time(&now);

        // Single conditional write: whoever flips claimed_by first owns the row.
        let changed = conn
            .execute(
                "UPDATE documents SET \
                    status = CASE WHEN status IN ('created', 'scheduled_retry') THEN 'in_progress' ELSE status END, \
                    claimed_by = ?1, \
                    claimed_at = ?2, \
                    updated_at = ?2 \
                 WHERE id = ?3 \
                   AND claimed_by IS NULL \
                   AND status IN ('created', 'scheduled_retry', 'sent_awaiting_ticket') \
                   AND (scheduled_at IS NULL OR scheduled_at <= ?2)",
                params![claim_token, now_str, id],
            )
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        if changed == 0 {
            return Ok(None);
        }

        Self::fetch(&conn, id)
    }

    fn release(
        &self,
        id: &str,
        claim_token: &str,
        update: &DocumentUpdate,
    ) -> Result<Document, DocumentError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let changed = conn
            .execute(
                "UPDATE documents SET \
                    status = ?, retries = ?, last_error = ?, ticket = ?, scheduled_at = ?, \
                    cdr_ref = ?, ticket_polls = ?, ambiguous = ?, claimed_by = NULL, claimed_at = NULL, \
                    updated_at = ? \
                 WHERE id = ? AND claimed_by = ?",
                params![
                    update.status.as_str(),
                    update.retries,
                    update.last_error,
                    update.ticket,
                    update.scheduled_at.as_ref().map(db_time),
                    update.cdr_ref,
                    update.ticket_polls,
                    update.ambiguous,
                    db_time(&now),
                    id,
                    claim_token,
                ],
            )
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        if changed == 0 {
            return match Self::fetch(&conn, id)? {
                Some(_) => Err(DocumentError::ClaimLost(id.to_string())),
                None => Err(DocumentError::NotFound(id.to_string())),
            };
        }

        Self::fetch(&conn, id)?.ok_or_else(|| DocumentError::NotFound(id.to_string()))
    }

    fn reset_for_retry(&self, id: &str) -> Result<Document, DocumentError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let changed = conn
            .execute(
                "UPDATE documents SET \
                    status = 'scheduled_retry', retries = 0, last_error = NULL, \
                    scheduled_at = NULL, ticket_polls = 0, updated_at = ? \
                 WHERE id = ? AND status = 'error' AND claimed_by IS NULL",
                params![db_time(&now), id],
            )
            .map_err(|e| DocumentError::Database(e.to_string()))?;

        let current = Self::fetch(&conn, id)?.ok_or_else(|| DocumentError::NotFound(id.to_string()))?;

        if changed == 0 {
            return Err(DocumentError::InvalidState {
                document_id: id.to_string(),
                current_status: current.status.to_string(),
                operation: "retry".to_string(),
            });
        }

        Ok(current)
    }
}
