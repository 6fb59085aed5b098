use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use refine_core::collaborators::{CollaboratorError, SubsectionRecord, SubsectionStore};
use refine_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;

/// A persisted subsection row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSubsection {
    pub session_id: String,
    pub section_index: usize,
    pub subsection_index: usize,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct SubsectionRepo {
    db: Database,
}

impl SubsectionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the row for `(session, section, subsection)`.
    /// `created_at` survives a replace.
    pub fn save(&self, record: &SubsectionRecord) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subsections
                    (session_id, section_index, subsection_index, title, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT (session_id, section_index, subsection_index)
                 DO UPDATE SET title = excluded.title,
                               content = excluded.content,
                               updated_at = excluded.updated_at",
                params![
                    record.session_id.as_str(),
                    record.section_index as i64,
                    record.subsection_index as i64,
                    record.title,
                    record.content,
                    now,
                ],
            )?;
            Ok(())
        })?;
        debug!(
            session_id = %record.session_id,
            section = record.section_index,
            subsection = record.subsection_index,
            "subsection persisted"
        );
        Ok(())
    }

    pub fn get(
        &self,
        session_id: &SessionId,
        section_index: usize,
        subsection_index: usize,
    ) -> Result<Option<StoredSubsection>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, section_index, subsection_index, title, content, created_at, updated_at
                     FROM subsections
                     WHERE session_id = ?1 AND section_index = ?2 AND subsection_index = ?3",
                    params![session_id.as_str(), section_index as i64, subsection_index as i64],
                    row_to_subsection,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All rows for a session in document order.
    pub fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<StoredSubsection>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, section_index, subsection_index, title, content, created_at, updated_at
                 FROM subsections WHERE session_id = ?1
                 ORDER BY section_index, subsection_index",
            )?;
            let rows = stmt
                .query_map([session_id.as_str()], row_to_subsection)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_subsection(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSubsection> {
    Ok(StoredSubsection {
        session_id: row.get(0)?,
        section_index: row.get::<_, i64>(1)? as usize,
        subsection_index: row.get::<_, i64>(2)? as usize,
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl SubsectionStore for SubsectionRepo {
    fn upsert(&self, record: &SubsectionRecord) -> Result<(), CollaboratorError> {
        self.save(record).map_err(CollaboratorError::from)
    }
}
