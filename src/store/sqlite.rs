//! SQLite-backed loan store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{Document, DocumentOrigin};

use super::{AssignmentMap, CompletionSet, LoanStore, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    loan_id TEXT NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    source_path TEXT NOT NULL,
    origin TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    remote_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_documents_loan ON documents(loan_id);

CREATE TABLE IF NOT EXISTS assignments (
    loan_id TEXT NOT NULL,
    requirement TEXT NOT NULL,
    document_id TEXT NOT NULL,
    PRIMARY KEY (loan_id, requirement, document_id)
);

CREATE TABLE IF NOT EXISTS completion (
    loan_id TEXT NOT NULL,
    requirement TEXT NOT NULL,
    PRIMARY KEY (loan_id, requirement)
);

CREATE TABLE IF NOT EXISTS custom_requirements (
    loan_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (loan_id, name)
);
"#;

/// SQLite store; one connection guarded by a mutex, matching the per-loan
/// caller-serialization assumption.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}

/// Parse a stored datetime, defaulting to the Unix epoch on error.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

impl SqliteStore {
    /// Open (and initialize) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let origin: String = row.get("origin")?;
        let uploaded_at: String = row.get("uploaded_at")?;
        let source_path: String = row.get("source_path")?;
        Ok(Document {
            id: row.get("id")?,
            loan_id: row.get("loan_id")?,
            name: row.get("name")?,
            category: row.get("category")?,
            mime_type: row.get("mime_type")?,
            source_path: PathBuf::from(source_path),
            origin: DocumentOrigin::from_str(&origin).unwrap_or(DocumentOrigin::LocalUpload),
            size_bytes: row.get::<_, i64>("size_bytes")? as u64,
            content_hash: row.get("content_hash")?,
            uploaded_at: parse_datetime(&uploaded_at),
            deleted: row.get::<_, i64>("deleted")? != 0,
            remote_id: row.get("remote_id")?,
        })
    }
}

impl LoanStore for SqliteStore {
    fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents
                 (id, loan_id, name, category, mime_type, source_path, origin,
                  size_bytes, content_hash, uploaded_at, deleted, remote_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 mime_type = excluded.mime_type,
                 source_path = excluded.source_path,
                 origin = excluded.origin,
                 size_bytes = excluded.size_bytes,
                 content_hash = excluded.content_hash,
                 uploaded_at = excluded.uploaded_at,
                 deleted = excluded.deleted,
                 remote_id = excluded.remote_id",
            params![
                document.id,
                document.loan_id,
                document.name,
                document.category,
                document.mime_type,
                document.source_path.to_string_lossy(),
                document.origin.as_str(),
                document.size_bytes as i64,
                document.content_hash,
                document.uploaded_at.to_rfc3339(),
                document.deleted as i64,
                document.remote_id,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_document(
        &self,
        loan_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM documents WHERE loan_id = ?1 AND id = ?2")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map(params![loan_id, document_id], Self::row_to_document)
            .map_err(db_err)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(db_err)?)),
            None => Ok(None),
        }
    }

    fn list_documents(&self, loan_id: &str) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM documents WHERE loan_id = ?1 ORDER BY uploaded_at, id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![loan_id], Self::row_to_document)
            .map_err(db_err)?;
        let mut documents = Vec::new();
        for row in rows {
            documents.push(row.map_err(db_err)?);
        }
        Ok(documents)
    }

    fn remove_document(&self, loan_id: &str, document_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM documents WHERE loan_id = ?1 AND id = ?2",
            params![loan_id, document_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn save_assignments(
        &self,
        loan_id: &str,
        assignments: &AssignmentMap,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM assignments WHERE loan_id = ?1", params![loan_id])
            .map_err(db_err)?;
        for (requirement, document_ids) in assignments {
            for document_id in document_ids {
                tx.execute(
                    "INSERT INTO assignments (loan_id, requirement, document_id)
                     VALUES (?1, ?2, ?3)",
                    params![loan_id, requirement, document_id],
                )
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)
    }

    fn load_assignments(&self, loan_id: &str) -> Result<AssignmentMap, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT requirement, document_id FROM assignments WHERE loan_id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![loan_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;
        let mut map = AssignmentMap::new();
        for row in rows {
            let (requirement, document_id) = row.map_err(db_err)?;
            map.entry(requirement)
                .or_insert_with(BTreeSet::new)
                .insert(document_id);
        }
        Ok(map)
    }

    fn save_completion(&self, loan_id: &str, completion: &CompletionSet) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute("DELETE FROM completion WHERE loan_id = ?1", params![loan_id])
            .map_err(db_err)?;
        for requirement in completion {
            tx.execute(
                "INSERT INTO completion (loan_id, requirement) VALUES (?1, ?2)",
                params![loan_id, requirement],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    fn load_completion(&self, loan_id: &str) -> Result<CompletionSet, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT requirement FROM completion WHERE loan_id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![loan_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut set = CompletionSet::new();
        for row in rows {
            set.insert(row.map_err(db_err)?);
        }
        Ok(set)
    }

    fn save_custom_requirements(&self, loan_id: &str, names: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM custom_requirements WHERE loan_id = ?1",
            params![loan_id],
        )
        .map_err(db_err)?;
        for (position, name) in names.iter().enumerate() {
            tx.execute(
                "INSERT INTO custom_requirements (loan_id, position, name) VALUES (?1, ?2, ?3)",
                params![loan_id, position as i64, name],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    fn load_custom_requirements(&self, loan_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM custom_requirements WHERE loan_id = ?1 ORDER BY position",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![loan_id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row.map_err(db_err)?);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(loan_id: &str, name: &str) -> Document {
        Document::new(
            loan_id,
            name,
            "General Document",
            "application/pdf",
            PathBuf::from("/tmp/x.pdf"),
            DocumentOrigin::LocalUpload,
            b"bytes",
        )
    }

    #[test]
    fn test_document_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut d = doc("loan-1", "appraisal.pdf");
        d.remote_id = Some("remote-123".to_string());
        store.save_document(&d).unwrap();

        let loaded = store.get_document("loan-1", &d.id).unwrap().unwrap();
        assert_eq!(loaded.name, "appraisal.pdf");
        assert_eq!(loaded.remote_id.as_deref(), Some("remote-123"));
        assert_eq!(loaded.origin, DocumentOrigin::LocalUpload);
        assert_eq!(loaded.content_hash, d.content_hash);
    }

    #[test]
    fn test_upsert_soft_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut d = doc("loan-1", "a.pdf");
        store.save_document(&d).unwrap();
        d.deleted = true;
        store.save_document(&d).unwrap();
        let docs = store.list_documents("loan-1").unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].deleted);
    }

    #[test]
    fn test_assignments_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut map = BTreeMap::new();
        map.insert(
            "Appraisal Report".to_string(),
            ["doc-1".to_string(), "doc-2".to_string()].into_iter().collect(),
        );
        store.save_assignments("loan-1", &map).unwrap();
        assert_eq!(store.load_assignments("loan-1").unwrap(), map);
        // Other loans unaffected.
        assert!(store.load_assignments("loan-2").unwrap().is_empty());
    }

    #[test]
    fn test_completion_and_custom_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let completion: CompletionSet = ["Insurance Policy".to_string()].into_iter().collect();
        store.save_completion("loan-1", &completion).unwrap();
        assert_eq!(store.load_completion("loan-1").unwrap(), completion);

        let customs = vec!["HOA Letter".to_string(), "Survey".to_string()];
        store.save_custom_requirements("loan-1", &customs).unwrap();
        assert_eq!(store.load_custom_requirements("loan-1").unwrap(), customs);
    }
}
