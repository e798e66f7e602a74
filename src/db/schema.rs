//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Books table
CREATE TABLE IF NOT EXISTS books (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'to-read',
    original_title TEXT,
    subtitle TEXT,
    author_last_first TEXT,
    translator TEXT,
    publisher TEXT,
    genre TEXT,
    category TEXT,
    description TEXT,
    published_date TEXT,
    year_published INTEGER,
    language TEXT,
    page_count INTEGER,
    -- Not unique: only a deduplication hint during import
    isbn TEXT,
    location TEXT,
    rating REAL,
    current_page INTEGER,
    date_started TEXT,
    date_finished TEXT,
    notes TEXT,
    wish_list INTEGER NOT NULL DEFAULT 0,
    previously_owned INTEGER NOT NULL DEFAULT 0,
    up_next INTEGER NOT NULL DEFAULT 0,
    cover_url TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_books_isbn ON books(isbn);
CREATE INDEX IF NOT EXISTS idx_books_title_author ON books(title, author);
CREATE INDEX IF NOT EXISTS idx_books_updated_at ON books(updated_at);
"#;
