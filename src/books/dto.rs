use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    books::repo_types::{Book, BookForUser, NewBook, ShelfStatus},
    problem::FieldError,
};

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

#[derive(Debug, Deserialize)]
pub struct BookListQuery {
    pub sort: Option<String>,
}

/// Book as the client sees it, including the caller's own shelf row.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
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
    pub user_rating: Option<i16>,
    pub user_shelf_status: Option<ShelfStatus>,
}

impl BookView {
    fn from_book(b: Book, user_rating: Option<i16>, user_shelf_status: Option<ShelfStatus>) -> Self {
        Self {
            id: b.id,
            name: b.name,
            genre: b.genre,
            cover_url: b.cover_url,
            description: b.description,
            average_rating: b.average_rating,
            rating_count: b.rating_count,
            have_read: b.have_read,
            currently_reading: b.currently_reading,
            want_to_read: b.want_to_read,
            user_rating,
            user_shelf_status,
        }
    }
}

impl From<BookForUser> for BookView {
    fn from(row: BookForUser) -> Self {
        Self::from_book(row.book, row.user_rating, row.user_status)
    }
}

impl From<Book> for BookView {
    fn from(b: Book) -> Self {
        Self::from_book(b, None, None)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetShelfRequest {
    pub status: ShelfStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateRequest {
    /// Any JSON number; `4.0` counts as the integer 4.
    pub rating: f64,
}

impl RateRequest {
    pub fn validate(&self) -> Result<i16, Vec<FieldError>> {
        if self.rating.fract() == 0.0 && (MIN_RATING..=MAX_RATING).contains(&self.rating) {
            Ok(self.rating as i16)
        } else {
            Err(vec![FieldError::new(
                "rating",
                "Rating must be a whole number from 1 to 5",
            )])
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub cover_url: String,
    #[serde(default)]
    pub description: String,
}

impl CreateBookRequest {
    pub fn validate(&self) -> Result<NewBook, Vec<FieldError>> {
        let new = NewBook {
            name: self.name.trim().to_string(),
            genre: self.genre.trim().to_string(),
            cover_url: self.cover_url.trim().to_string(),
            description: self.description.trim().to_string(),
        };
        let mut errors = Vec::new();
        for (field, value) in [
            ("name", &new.name),
            ("genre", &new.genre),
            ("description", &new.description),
        ] {
            if value.is_empty() {
                errors.push(FieldError::new(field, format!("{field} is required")));
            }
        }
        let cover_ok = reqwest::Url::parse(&new.cover_url)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
            .unwrap_or(false);
        if !cover_ok {
            errors.push(FieldError::new(
                "coverUrl",
                "coverUrl must be an absolute http(s) URL",
            ));
        }
        if errors.is_empty() {
            Ok(new)
        } else {
            Err(errors)
        }
    }
}
