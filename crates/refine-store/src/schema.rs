//! SQL DDL for the refinement store.

/// Recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: u32 = 1;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS subsections (
    session_id TEXT NOT NULL,
    section_index INTEGER NOT NULL,
    subsection_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (session_id, section_index, subsection_index)
);

CREATE TABLE IF NOT EXISTS vector_collections (
    session_id TEXT NOT NULL,
    paper_id TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, paper_id)
);

CREATE TABLE IF NOT EXISTS document_chunks (
    session_id TEXT NOT NULL,
    paper_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (session_id, paper_id, chunk_index),
    FOREIGN KEY (session_id, paper_id)
        REFERENCES vector_collections(session_id, paper_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_subsections_session ON subsections(session_id);
"#;
