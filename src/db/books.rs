//! Book catalog database operations

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::library::{Book, BookData, BookFilter};

const SELECT_BOOKS: &str = r#"
    SELECT id, title, author, status, original_title, subtitle, author_last_first,
           translator, publisher, genre, category, description, published_date,
           year_published, language, page_count, isbn, location, rating, current_page,
           date_started, date_finished, notes, wish_list, previously_owned, up_next,
           cover_url, created_at, updated_at
    FROM books
"#;

/// Persistence operations the rest of the server relies on.
///
/// Each call is its own transaction.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Insert a new record and return it with its assigned id
    async fn create(&self, data: &BookData) -> Result<Book>;

    /// Replace the data of an existing record, keeping its id and creation time
    async fn update(&self, id: &str, data: &BookData) -> Result<Book>;

    async fn get(&self, id: &str) -> Result<Option<Book>>;

    /// First record matching the filter, oldest first
    async fn find_first(&self, filter: &BookFilter) -> Result<Option<Book>>;

    /// Records matching the filter, most recently updated first
    async fn find_many(&self, filter: Option<&BookFilter>, limit: Option<i64>) -> Result<Vec<Book>>;

    /// Every record, oldest first, without buffering the whole table
    fn stream_all(&self) -> BoxStream<'_, Result<Book>>;

    async fn count(&self, filter: Option<&BookFilter>) -> Result<i64>;

    /// Returns false when no record had that id
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove every record, returning how many were removed
    async fn delete_many(&self) -> Result<u64>;
}

/// SQLite-backed book store
#[derive(Clone)]
pub struct BookRepository {
    pool: SqlitePool,
}

impl BookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookStore for BookRepository {
    async fn create(&self, data: &BookData) -> Result<Book> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let query = sqlx::query(
            r#"
            INSERT INTO books (id, title, author, status, original_title, subtitle, author_last_first,
                               translator, publisher, genre, category, description, published_date,
                               year_published, language, page_count, isbn, location, rating, current_page,
                               date_started, date_finished, notes, wish_list, previously_owned, up_next,
                               cover_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id);

        bind_data(query, data)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created book".to_string()))
    }

    async fn update(&self, id: &str, data: &BookData) -> Result<Book> {
        let query = sqlx::query(
            r#"
            UPDATE books SET
                title = ?, author = ?, status = ?, original_title = ?, subtitle = ?,
                author_last_first = ?, translator = ?, publisher = ?, genre = ?, category = ?,
                description = ?, published_date = ?, year_published = ?, language = ?,
                page_count = ?, isbn = ?, location = ?, rating = ?, current_page = ?,
                date_started = ?, date_finished = ?, notes = ?, wish_list = ?,
                previously_owned = ?, up_next = ?, cover_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        );

        let result = bind_data(query, data)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book not found: {}", id)));
        }

        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
    }

    async fn get(&self, id: &str) -> Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!("{} WHERE id = ?", SELECT_BOOKS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    async fn find_first(&self, filter: &BookFilter) -> Result<Option<Book>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_BOOKS);
        builder.push(" WHERE ");
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at ASC, rowid ASC LIMIT 1");

        let book = builder
            .build_query_as::<Book>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    async fn find_many(&self, filter: Option<&BookFilter>, limit: Option<i64>) -> Result<Vec<Book>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_BOOKS);
        if let Some(filter) = filter {
            builder.push(" WHERE ");
            push_filter(&mut builder, filter);
        }
        builder.push(" ORDER BY updated_at DESC, rowid DESC");
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let books = builder.build_query_as::<Book>().fetch_all(&self.pool).await?;

        Ok(books)
    }

    fn stream_all(&self) -> BoxStream<'_, Result<Book>> {
        sqlx::query_as::<_, Book>(STREAM_BOOKS)
            .fetch(&self.pool)
            .map(|row| row.map_err(AppError::from))
            .boxed()
    }

    async fn count(&self, filter: Option<&BookFilter>) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM books");
        if let Some(filter) = filter {
            builder.push(" WHERE ");
            push_filter(&mut builder, filter);
        }

        let result: (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;

        Ok(result.0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM books").execute(&self.pool).await?;

        tracing::info!(removed = result.rows_affected(), "Cleared book catalog");
        Ok(result.rows_affected())
    }
}

const STREAM_BOOKS: &str = r#"
    SELECT id, title, author, status, original_title, subtitle, author_last_first,
           translator, publisher, genre, category, description, published_date,
           year_published, language, page_count, isbn, location, rating, current_page,
           date_started, date_finished, notes, wish_list, previously_owned, up_next,
           cover_url, created_at, updated_at
    FROM books
    ORDER BY created_at ASC, rowid ASC
"#;

/// Bind every data column in table order
fn bind_data<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    data: &'q BookData,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&data.title)
        .bind(&data.author)
        .bind(data.status)
        .bind(&data.original_title)
        .bind(&data.subtitle)
        .bind(&data.author_last_first)
        .bind(&data.translator)
        .bind(&data.publisher)
        .bind(&data.genre)
        .bind(&data.category)
        .bind(&data.description)
        .bind(&data.published_date)
        .bind(data.year_published)
        .bind(&data.language)
        .bind(data.page_count)
        .bind(&data.isbn)
        .bind(&data.location)
        .bind(data.rating)
        .bind(data.current_page)
        .bind(data.date_started)
        .bind(data.date_finished)
        .bind(&data.notes)
        .bind(data.wish_list)
        .bind(data.previously_owned)
        .bind(data.up_next)
        .bind(&data.cover_url)
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &BookFilter) {
    match filter {
        BookFilter::Isbn(isbn) => {
            builder.push("isbn = ").push_bind(isbn.clone());
        }
        BookFilter::TitleAuthor { title, author } => {
            builder
                .push("(title = ")
                .push_bind(title.clone())
                .push(" AND author = ")
                .push_bind(author.clone())
                .push(")");
        }
        BookFilter::LocationContains(needle) => {
            builder
                .push("instr(location, ")
                .push_bind(needle.clone())
                .push(") > 0");
        }
        BookFilter::HasLocation => {
            builder.push("(location IS NOT NULL AND location <> '')");
        }
        BookFilter::MissingLocation => {
            builder.push("(location IS NULL OR location = '')");
        }
        BookFilter::Any(filters) if filters.is_empty() => {
            builder.push("0");
        }
        BookFilter::Any(filters) => {
            builder.push("(");
            for (i, inner) in filters.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                push_filter(builder, inner);
            }
            builder.push(")");
        }
    }
}
