use anyhow::Context;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::books::repo_types::{Book, ShelfStatus, UserBook};

/// Signed change to a book's three shelf counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub have_read: i32,
    pub currently_reading: i32,
    pub want_to_read: i32,
}

impl CounterDelta {
    fn bump(&mut self, status: ShelfStatus, by: i32) {
        match status {
            ShelfStatus::HaveRead => self.have_read += by,
            ShelfStatus::CurrentlyReading => self.currently_reading += by,
            ShelfStatus::WantToRead => self.want_to_read += by,
        }
    }
}

/// `None` when the status does not change.
pub fn shelf_delta(prev: Option<ShelfStatus>, next: ShelfStatus) -> Option<CounterDelta> {
    if prev == Some(next) {
        return None;
    }
    let mut delta = CounterDelta::default();
    if let Some(prev) = prev {
        delta.bump(prev, -1);
    }
    delta.bump(next, 1);
    Some(delta)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingAggregate {
    pub average: f64,
    pub count: i32,
}

/// Running mean update; `None` when the user's rating is unchanged.
pub fn apply_rating(
    current: RatingAggregate,
    prev: Option<i16>,
    next: i16,
) -> Option<RatingAggregate> {
    let next_f = f64::from(next);
    let updated = match prev {
        Some(old) if old == next => return None,
        None => {
            let count = current.count + 1;
            RatingAggregate {
                average: (current.average * f64::from(current.count) + next_f) / f64::from(count),
                count,
            }
        }
        Some(_) if current.count <= 1 => RatingAggregate {
            average: next_f,
            count: current.count.max(1),
        },
        Some(old) => {
            let count = f64::from(current.count);
            RatingAggregate {
                average: (current.average * count - f64::from(old) + next_f) / count,
                count: current.count,
            }
        }
    };
    Some(RatingAggregate {
        // float drift must not push the mean outside the rating scale
        average: updated.average.clamp(1.0, 5.0),
        ..updated
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShelfOutcome {
    Updated,
    Unchanged,
    BookNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutcome {
    Updated,
    Unchanged,
    BookNotFound,
}

/// Counter update and row write commit together under the book row lock.
pub async fn set_shelf_status(
    db: &PgPool,
    user_id: Uuid,
    book_id: Uuid,
    status: ShelfStatus,
) -> anyhow::Result<ShelfOutcome> {
    let mut tx = db.begin().await.context("begin shelf tx")?;

    if Book::lock_tx(&mut tx, book_id).await?.is_none() {
        return Ok(ShelfOutcome::BookNotFound);
    }
    let prev = UserBook::find_tx(&mut tx, user_id, book_id)
        .await?
        .and_then(|ub| ub.status);

    let Some(delta) = shelf_delta(prev, status) else {
        debug!(%user_id, %book_id, ?status, "shelf status unchanged");
        return Ok(ShelfOutcome::Unchanged);
    };

    Book::apply_counter_delta_tx(&mut tx, book_id, delta).await?;
    UserBook::upsert_status_tx(&mut tx, user_id, book_id, status).await?;
    tx.commit().await.context("commit shelf tx")?;

    info!(%user_id, %book_id, ?prev, ?status, "shelf status set");
    Ok(ShelfOutcome::Updated)
}

pub async fn rate_book(
    db: &PgPool,
    user_id: Uuid,
    book_id: Uuid,
    rating: i16,
) -> anyhow::Result<RateOutcome> {
    let mut tx = db.begin().await.context("begin rating tx")?;

    let Some(book) = Book::lock_tx(&mut tx, book_id).await? else {
        return Ok(RateOutcome::BookNotFound);
    };
    let prev = UserBook::find_tx(&mut tx, user_id, book_id)
        .await?
        .and_then(|ub| ub.rating);

    let current = RatingAggregate {
        average: book.average_rating,
        count: book.rating_count,
    };
    let Some(next) = apply_rating(current, prev, rating) else {
        debug!(%user_id, %book_id, rating, "rating unchanged");
        return Ok(RateOutcome::Unchanged);
    };

    Book::set_rating_aggregate_tx(&mut tx, book_id, next).await?;
    UserBook::upsert_rating_tx(&mut tx, user_id, book_id, rating).await?;
    tx.commit().await.context("commit rating tx")?;

    info!(%user_id, %book_id, rating, average = next.average, count = next.count, "book rated");
    Ok(RateOutcome::Updated)
}
