//! SQLite-backed retention store.
//!
//! Keeps followed sources and a bounded cache of recent items per source.
//! For every source the store retains at most `keep_count` of the most
//! recent items (by `created_at`) plus every delivered item; everything else
//! is removed by [`RetentionStore::prune`], which also runs after each
//! successful insert.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema;
use crate::error::Result;
use crate::models::{CachedItem, Post, Source};

const ITEM_COLUMNS: &str = "id, source_id, external_id, url, content, image, created_at, \
     inserted_at, is_analyzed, analysis_result, is_delivered, delivered_at";

/// Persistent store for sources and cached items.
pub struct RetentionStore {
    conn: Connection,
    keep_count: usize,
}

impl RetentionStore {
    /// Open or create the database at `path`.
    ///
    /// `keep_count` is the retention bound used by the prune that follows
    /// every insert and by [`run_maintenance`](Self::run_maintenance).
    pub fn open(path: impl AsRef<Path>, keep_count: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            log::info!("Database file does not exist, will be created: {}", path.display());
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::init_schema(&conn)?;

        log::debug!("Connected to database: {}", path.display());
        Ok(Self { conn, keep_count })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(keep_count: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self { conn, keep_count })
    }

    // --- Sources ---

    /// Follow a new handle. Returns `None` if it is already followed.
    pub fn add_source(&self, handle: &str) -> Result<Option<Source>> {
        let handle = Source::normalize_handle(handle)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO sources (handle, enabled) VALUES (?1, 1)",
            params![handle],
        )?;

        if inserted == 0 {
            log::warn!("Source @{} already exists", handle);
            return Ok(None);
        }

        let id = self.conn.last_insert_rowid();
        log::info!("Added source @{} (id {})", handle, id);
        Ok(Some(Source {
            id,
            handle,
            enabled: true,
        }))
    }

    /// Stop following a handle; its cached items are deleted with it.
    pub fn remove_source(&self, handle: &str) -> Result<bool> {
        let handle = Source::normalize_handle(handle)?;
        let removed = self
            .conn
            .execute("DELETE FROM sources WHERE handle = ?1", params![handle])?;

        if removed == 0 {
            log::warn!("Source @{} not found", handle);
        } else {
            log::info!("Removed source @{}", handle);
        }
        Ok(removed > 0)
    }

    pub fn set_enabled(&self, handle: &str, enabled: bool) -> Result<bool> {
        let handle = Source::normalize_handle(handle)?;
        let updated = self.conn.execute(
            "UPDATE sources SET enabled = ?1 WHERE handle = ?2",
            params![enabled, handle],
        )?;

        if updated == 0 {
            log::warn!("Source @{} not found", handle);
        } else {
            log::info!(
                "{} source @{}",
                if enabled { "Enabled" } else { "Disabled" },
                handle
            );
        }
        Ok(updated > 0)
    }

    pub fn list_sources(&self, enabled_only: bool) -> Result<Vec<Source>> {
        let sql = if enabled_only {
            "SELECT id, handle, enabled FROM sources WHERE enabled = 1 ORDER BY id"
        } else {
            "SELECT id, handle, enabled FROM sources ORDER BY id"
        };

        let mut stmt = self.conn.prepare(sql)?;
        let sources = stmt
            .query_map([], row_to_source)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sources)
    }

    pub fn source_by_id(&self, id: i64) -> Result<Option<Source>> {
        let source = self
            .conn
            .query_row(
                "SELECT id, handle, enabled FROM sources WHERE id = ?1",
                params![id],
                row_to_source,
            )
            .optional()?;
        Ok(source)
    }

    // --- Items ---

    /// True iff some stored item has this external id.
    pub fn item_exists(&self, external_id: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM items WHERE external_id = ?1)",
            params![external_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert a post for `source_id`.
    ///
    /// Returns the new row id, or `None` when the external id is already
    /// stored. A successful insert prunes the source afterwards.
    pub fn store_item(&self, post: &Post, source_id: i64) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO items
                (source_id, external_id, url, content, image, created_at, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source_id,
                post.external_id,
                post.url,
                post.content,
                post.image,
                post.created_at,
                Utc::now(),
            ],
        )?;

        if inserted == 0 {
            log::debug!("Item {} already exists", post.external_id);
            return Ok(None);
        }

        let id = self.conn.last_insert_rowid();
        log::debug!("Stored item {} (row {})", post.external_id, id);

        self.prune(source_id, self.keep_count)?;
        Ok(Some(id))
    }

    /// Insert a post that has already been analyzed and delivered.
    ///
    /// Used for posts the insert-time prune evicted before delivery. The row
    /// is delivered from the start, so no prune can remove it and the post is
    /// not picked up again. Returns `None` when the external id is stored.
    pub fn store_delivered(
        &self,
        post: &Post,
        source_id: i64,
        analysis: &str,
    ) -> Result<Option<i64>> {
        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO items
                (source_id, external_id, url, content, image, created_at, inserted_at,
                 is_analyzed, analysis_result, is_delivered, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, 1, ?7)",
            params![
                source_id,
                post.external_id,
                post.url,
                post.content,
                post.image,
                post.created_at,
                now,
                analysis,
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }
        log::debug!("Stored delivered item {}", post.external_id);
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Look up a single item by external id.
    pub fn item(&self, external_id: &str) -> Result<Option<CachedItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE external_id = ?1");
        let item = self
            .conn
            .query_row(&sql, params![external_id], row_to_item)
            .optional()?;
        Ok(item)
    }

    /// Items not analyzed yet, newest first.
    pub fn unanalyzed(&self, limit: usize) -> Result<Vec<CachedItem>> {
        self.query_items("is_analyzed = 0", limit)
    }

    /// Record an analysis result. Returns `false` if the item is unknown.
    pub fn update_analysis(&self, external_id: &str, result: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE items SET is_analyzed = 1, analysis_result = ?1 WHERE external_id = ?2",
            params![result, external_id],
        )?;
        if updated == 0 {
            log::warn!("Item {} not found while storing analysis", external_id);
        }
        Ok(updated > 0)
    }

    /// Analyzed items still awaiting delivery, newest first.
    ///
    /// Each item carries its `source_id` and `analysis_result`.
    pub fn unsent_analyzed(&self, limit: usize) -> Result<Vec<CachedItem>> {
        self.query_items("is_analyzed = 1 AND is_delivered = 0", limit)
    }

    /// Flag an item as delivered now. Returns `false` if the item is unknown.
    pub fn mark_delivered(&self, external_id: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE items SET is_delivered = 1, delivered_at = ?1 WHERE external_id = ?2",
            params![Utc::now(), external_id],
        )?;
        if updated == 0 {
            log::warn!("Item {} not found while marking delivered", external_id);
        }
        Ok(updated > 0)
    }

    // --- Retention ---

    /// Delete every item of `source_id` that is neither delivered nor among
    /// the `keep_count` most recent. Returns the number of deleted rows.
    pub fn prune(&self, source_id: i64, keep_count: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM items
             WHERE source_id = ?1
               AND is_delivered = 0
               AND id NOT IN (
                   SELECT id FROM items
                   WHERE source_id = ?1
                   ORDER BY created_at DESC, id DESC
                   LIMIT ?2
               )",
            params![source_id, to_sql_limit(keep_count)],
        )?;

        if deleted > 0 {
            log::debug!(
                "Pruned {} items for source {} (keeping {} + delivered)",
                deleted,
                source_id,
                keep_count
            );
        }
        Ok(deleted)
    }

    /// Prune every known source with the store's `keep_count`.
    pub fn run_maintenance(&self) -> Result<usize> {
        log::info!("Running database maintenance...");
        let mut total = 0;

        for source in self.list_sources(false)? {
            match self.prune(source.id, self.keep_count) {
                Ok(deleted) => total += deleted,
                Err(e) => log::error!("Failed to prune @{}: {}", source.handle, e),
            }
        }

        log::info!("Maintenance complete. Deleted {} old items", total);
        Ok(total)
    }

    fn query_items(&self, filter: &str, limit: usize) -> Result<Vec<CachedItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE {filter} \
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![to_sql_limit(limit)], row_to_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        handle: row.get(1)?,
        enabled: row.get(2)?,
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<CachedItem> {
    Ok(CachedItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        post: Post {
            external_id: row.get(2)?,
            url: row.get(3)?,
            content: row.get(4)?,
            image: row.get(5)?,
            created_at: row.get(6)?,
        },
        inserted_at: row.get(7)?,
        is_analyzed: row.get(8)?,
        analysis_result: row.get(9)?,
        is_delivered: row.get(10)?,
        delivered_at: row.get(11)?,
    })
}
