//! SQLite repository

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use pdf_annotator_core::{
    now_millis, Annotation, AnnotationId, AnnotationStyle, AnnotationVariant, Color, DocumentId, PageSnapshot,
    PersistenceConfig,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};
use crate::repository::{AnnotationRepository, DocumentRecord};
use crate::schema::initialize_schema;

const UPSERT_ANNOTATION: &str = r#"
INSERT INTO annotations (id, document_id, page_index, position, variant, geometry_blob, color,
                         stroke_width, opacity, author, created_at, modified_at, deleted)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(document_id, id) DO UPDATE SET
    page_index = excluded.page_index,
    position = excluded.position,
    variant = excluded.variant,
    geometry_blob = excluded.geometry_blob,
    color = excluded.color,
    stroke_width = excluded.stroke_width,
    opacity = excluded.opacity,
    author = excluded.author,
    created_at = excluded.created_at,
    modified_at = excluded.modified_at,
    deleted = excluded.deleted
"#;

#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct AnnotationRow {
    id: String,
    document_id: String,
    page_index: i64,
    variant: String,
    geometry_blob: String,
    color: String,
    stroke_width: f64,
    opacity: f64,
    author: Option<String>,
    created_at: i64,
    modified_at: i64,
    deleted: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: String,
    path: Option<String>,
    page_count: i64,
    last_opened: i64,
}

impl SqliteRepository {
    /// Connect to a database URL such as `sqlite://annotations.sqlite3`
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect_with(options, max_connections).await
    }

    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path, max_connections: u32) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let repository = Self::connect_with(SqliteConnectOptions::new().filename(path), max_connections).await?;
        info!(path = %path.display(), "annotation database opened");
        Ok(repository)
    }

    /// Open the configured database, or the default one in the data directory
    pub async fn from_config(config: &PersistenceConfig) -> PersistenceResult<Self> {
        let path: PathBuf = match &config.database_path {
            Some(path) => path.clone(),
            None => crate::default_database_path()?,
        };
        Self::open(&path, config.max_connections).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> PersistenceResult<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        initialize_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AnnotationRepository for SqliteRepository {
    async fn write_page(&self, snapshot: &PageSnapshot) -> PersistenceResult<()> {
        let rows = snapshot
            .upserts
            .iter()
            .map(AnnotationRow::from_annotation)
            .collect::<PersistenceResult<Vec<_>>>()?;

        let positions: HashMap<AnnotationId, i64> = snapshot
            .order
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position as i64))
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, page_count, last_opened)
            VALUES (?, 0, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(snapshot.document_id.as_str())
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        for (index, (annotation, row)) in snapshot.upserts.iter().zip(&rows).enumerate() {
            // Records missing from the page order go after it, in snapshot order
            let position = positions
                .get(&annotation.id())
                .copied()
                .unwrap_or((snapshot.order.len() + index) as i64);
            sqlx::query(UPSERT_ANNOTATION)
                .bind(&row.id)
                .bind(&row.document_id)
                .bind(row.page_index)
                .bind(position)
                .bind(&row.variant)
                .bind(&row.geometry_blob)
                .bind(&row.color)
                .bind(row.stroke_width)
                .bind(row.opacity)
                .bind(&row.author)
                .bind(row.created_at)
                .bind(row.modified_at)
                .bind(row.deleted)
                .execute(&mut *tx)
                .await?;
        }

        for id in &snapshot.removals {
            sqlx::query("DELETE FROM annotations WHERE document_id = ? AND id = ?")
                .bind(snapshot.document_id.as_str())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        // Untouched records shift when earlier ones are removed or restored
        let upserted: Vec<AnnotationId> = snapshot.upserts.iter().map(Annotation::id).collect();
        for (id, position) in &positions {
            if upserted.contains(id) {
                continue;
            }
            sqlx::query("UPDATE annotations SET position = ? WHERE document_id = ? AND id = ? AND position <> ?")
                .bind(position)
                .bind(snapshot.document_id.as_str())
                .bind(id.to_string())
                .bind(position)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(
            document = %snapshot.document_id,
            page = snapshot.page_index,
            revision = snapshot.revision,
            upserts = rows.len(),
            removals = snapshot.removals.len(),
            "page written"
        );
        Ok(())
    }

    async fn load_document(&self, document_id: &DocumentId) -> PersistenceResult<BTreeMap<u32, Vec<Annotation>>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, document_id, page_index, variant, geometry_blob, color,
                   stroke_width, opacity, author, created_at, modified_at, deleted
            FROM annotations
            WHERE document_id = ?
            ORDER BY page_index ASC, position ASC, created_at ASC, rowid ASC
            "#,
        )
        .bind(document_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut pages: BTreeMap<u32, Vec<Annotation>> = BTreeMap::new();
        for row in rows {
            let annotation = row.into_annotation()?;
            pages.entry(annotation.page_index()).or_default().push(annotation);
        }
        debug!(document = %document_id, pages = pages.len(), "annotations loaded");
        Ok(pages)
    }

    async fn record_document(&self, record: &DocumentRecord) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, path, page_count, last_opened)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = COALESCE(excluded.path, documents.path),
                page_count = excluded.page_count,
                last_opened = excluded.last_opened
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.path.as_ref().map(|path| path.to_string_lossy().into_owned()))
        .bind(i64::from(record.page_count))
        .bind(record.last_opened)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_documents(&self, limit: u32) -> PersistenceResult<Vec<DocumentRecord>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, path, page_count, last_opened
            FROM documents
            ORDER BY last_opened DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DocumentRecord {
                id: DocumentId::new(row.id),
                path: row.path.map(PathBuf::from),
                page_count: u32::try_from(row.page_count).unwrap_or(0),
                last_opened: row.last_opened,
            })
            .collect())
    }
}

impl AnnotationRow {
    fn from_annotation(annotation: &Annotation) -> PersistenceResult<Self> {
        let style = annotation.style();
        Ok(Self {
            id: annotation.id().to_string(),
            document_id: annotation.document_id().as_str().to_string(),
            page_index: i64::from(annotation.page_index()),
            variant: annotation.kind().as_str().to_string(),
            geometry_blob: serde_json::to_string(annotation.variant())?,
            color: style.color.to_hex(),
            stroke_width: style.stroke_width,
            opacity: style.opacity,
            author: annotation.author().map(str::to_string),
            created_at: annotation.created_at(),
            modified_at: annotation.modified_at(),
            deleted: annotation.is_deleted(),
        })
    }

    fn into_annotation(self) -> PersistenceResult<Annotation> {
        let id = AnnotationId::parse_str(&self.id).map_err(|e| PersistenceError::corrupt(&self.id, e.to_string()))?;
        let variant: AnnotationVariant = serde_json::from_str(&self.geometry_blob)
            .map_err(|e| PersistenceError::corrupt_annotation(id, format!("geometry: {e}")))?;
        if variant.kind().as_str() != self.variant {
            return Err(PersistenceError::corrupt_annotation(
                id,
                format!("variant column {} does not match geometry {}", self.variant, variant.kind()),
            ));
        }
        let color = Color::from_hex(&self.color)
            .ok_or_else(|| PersistenceError::corrupt_annotation(id, format!("color {}", self.color)))?;
        let page_index = u32::try_from(self.page_index)
            .map_err(|_| PersistenceError::corrupt_annotation(id, format!("page index {}", self.page_index)))?;

        let style = AnnotationStyle { color, stroke_width: self.stroke_width, opacity: self.opacity };
        Ok(Annotation::with_id(id, DocumentId::new(self.document_id), page_index, variant, style)
            .with_author(self.author)
            .with_timestamps(self.created_at, self.modified_at)
            .with_deleted(self.deleted))
    }
}
