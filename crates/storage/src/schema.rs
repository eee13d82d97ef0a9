//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::PersistenceResult;

/// Create tables and indexes; safe to run on every open
pub(crate) async fn initialize_schema(pool: &SqlitePool) -> PersistenceResult<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Opened documents, keyed by content hash
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    path TEXT,
    page_count INTEGER NOT NULL DEFAULT 0,
    last_opened INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_last_opened ON documents(last_opened);

-- Annotations; deleted = 1 marks a tombstone kept until purge. Ids are
-- unique per document, since an exported copy carries the same ids.
CREATE TABLE IF NOT EXISTS annotations (
    id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    -- Place within the page, front-most last
    position INTEGER NOT NULL DEFAULT 0,
    variant TEXT NOT NULL,
    geometry_blob TEXT NOT NULL,
    color TEXT NOT NULL,
    stroke_width REAL NOT NULL,
    opacity REAL NOT NULL DEFAULT 1.0,
    author TEXT,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (document_id, id)
);

CREATE INDEX IF NOT EXISTS idx_annotations_document_page ON annotations(document_id, page_index);
"#;
