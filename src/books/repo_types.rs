use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Mutually exclusive per-user shelf placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "shelf_status", rename_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum ShelfStatus {
    HaveRead,
    CurrentlyReading,
    WantToRead,
}

/// Catalog row with its cached aggregates.
#[derive(Debug, Clone, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub name: String,
    pub genre: String,
    pub cover_url: String,
    pub description: String,
    pub average_rating: f64,
    pub rating_count: i32,
    pub have_read: i32,
    pub currently_reading: i32,
    pub want_to_read: i32,
    pub created_at: OffsetDateTime,
}

/// A book plus the calling user's own row, if any.
#[derive(Debug, Clone, FromRow)]
pub struct BookForUser {
    #[sqlx(flatten)]
    pub book: Book,
    pub user_rating: Option<i16>,
    pub user_status: Option<ShelfStatus>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserBook {
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub status: Option<ShelfStatus>,
    pub rating: Option<i16>,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub name: String,
    pub genre: String,
    pub cover_url: String,
    pub description: String,
}

/// `?sort=` values accepted by the catalog listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Read,
    Want,
    Rating,
    NameAsc,
    NameDesc,
}

impl SortKey {
    pub fn order_by(sort: Option<SortKey>) -> &'static str {
        match sort {
            None => "b.created_at DESC, b.id ASC",
            Some(SortKey::Read) => "b.have_read DESC, b.id ASC",
            Some(SortKey::Want) => "b.want_to_read DESC, b.id ASC",
            Some(SortKey::Rating) => "b.average_rating DESC, b.id ASC",
            Some(SortKey::NameAsc) => "b.name ASC, b.id ASC",
            Some(SortKey::NameDesc) => "b.name DESC, b.id ASC",
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "want" => Ok(Self::Want),
            "rating" => Ok(Self::Rating),
            "name_asc" => Ok(Self::NameAsc),
            "name_desc" => Ok(Self::NameDesc),
            other => Err(format!(
                "unknown sort {other:?}; expected one of read, want, rating, name_asc, name_desc"
            )),
        }
    }
}
