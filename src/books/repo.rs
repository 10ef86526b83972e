use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::books::{
    repo_types::{Book, BookForUser, NewBook, ShelfStatus, SortKey, UserBook},
    services::{CounterDelta, RatingAggregate},
};

const BOOK_COLUMNS: &str = "b.id, b.name, b.genre, b.cover_url, b.description, \
     b.average_rating, b.rating_count, b.have_read, b.currently_reading, b.want_to_read, \
     b.created_at";

impl Book {
    /// Whole catalog; `viewer` joins in that user's own shelf row.
    pub async fn list_for(
        db: &PgPool,
        viewer: Option<Uuid>,
        sort: Option<SortKey>,
    ) -> anyhow::Result<Vec<BookForUser>> {
        let sql = format!(
            r#"
            SELECT {BOOK_COLUMNS}, ub.rating AS user_rating, ub.status AS user_status
              FROM books b
              LEFT JOIN user_books ub ON ub.book_id = b.id AND ub.user_id = $1
             ORDER BY {order}
            "#,
            order = SortKey::order_by(sort),
        );
        let rows = sqlx::query_as::<_, BookForUser>(&sql)
            .bind(viewer)
            .fetch_all(db)
            .await
            .context("list books")?;
        Ok(rows)
    }

    pub async fn find_for(
        db: &PgPool,
        id: Uuid,
        viewer: Option<Uuid>,
    ) -> anyhow::Result<Option<BookForUser>> {
        let row = sqlx::query_as::<_, BookForUser>(&format!(
            r#"
            SELECT {BOOK_COLUMNS}, ub.rating AS user_rating, ub.status AS user_status
              FROM books b
              LEFT JOIN user_books ub ON ub.book_id = b.id AND ub.user_id = $2
             WHERE b.id = $1
            "#
        ))
        .bind(id)
        .bind(viewer)
        .fetch_optional(db)
        .await
        .context("find book")?;
        Ok(row)
    }

    pub async fn create(db: &PgPool, new: &NewBook) -> anyhow::Result<Book> {
        let book = sqlx::query_as::<_, Book>(&format!(
            r#"
            INSERT INTO books AS b (name, genre, cover_url, description)
            VALUES ($1, $2, $3, $4)
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&new.genre)
        .bind(&new.cover_url)
        .bind(&new.description)
        .fetch_one(db)
        .await
        .context("insert book")?;
        Ok(book)
    }

    /// Row lock that serializes every aggregate write for this book.
    pub async fn lock_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> anyhow::Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("lock book")?;
        Ok(book)
    }

    pub async fn apply_counter_delta_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        delta: CounterDelta,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE books
               SET have_read = have_read + $2,
                   currently_reading = currently_reading + $3,
                   want_to_read = want_to_read + $4
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta.have_read)
        .bind(delta.currently_reading)
        .bind(delta.want_to_read)
        .execute(&mut **tx)
        .await
        .context("apply shelf counters")?;
        Ok(())
    }

    pub async fn set_rating_aggregate_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        agg: RatingAggregate,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE books SET average_rating = $2, rating_count = $3 WHERE id = $1")
            .bind(id)
            .bind(agg.average)
            .bind(agg.count)
            .execute(&mut **tx)
            .await
            .context("set rating aggregate")?;
        Ok(())
    }
}

impl UserBook {
    pub async fn find_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        book_id: Uuid,
    ) -> anyhow::Result<Option<UserBook>> {
        let row = sqlx::query_as::<_, UserBook>(
            r#"
            SELECT user_id, book_id, status, rating
              FROM user_books
             WHERE user_id = $1 AND book_id = $2
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await
        .context("find user book")?;
        Ok(row)
    }

    pub async fn upsert_status_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        book_id: Uuid,
        status: ShelfStatus,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_books (user_id, book_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, book_id)
            DO UPDATE SET status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(status)
        .execute(&mut **tx)
        .await
        .context("upsert shelf status")?;
        Ok(())
    }

    pub async fn upsert_rating_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        book_id: Uuid,
        rating: i16,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_books (user_id, book_id, rating)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, book_id)
            DO UPDATE SET rating = EXCLUDED.rating, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .bind(rating)
        .execute(&mut **tx)
        .await
        .context("upsert rating")?;
        Ok(())
    }

    /// Books the user has placed on a shelf, oldest first.
    pub async fn shelf_of(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<(Uuid, ShelfStatus)>> {
        let rows = sqlx::query_as::<_, (Uuid, ShelfStatus)>(
            r#"
            SELECT book_id, status
              FROM user_books
             WHERE user_id = $1 AND status IS NOT NULL
             ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await
        .context("list user shelf")?;
        Ok(rows)
    }
}
