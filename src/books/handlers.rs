use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::extractors::{AuthUser, MaybeAuthUser},
    books::{
        dto::{BookListQuery, BookView, CreateBookRequest, RateRequest, SetShelfRequest},
        repo_types::{Book, SortKey},
        services::{rate_book, set_shelf_status, RateOutcome, ShelfOutcome},
    },
    problem::{internal, problem, validation, ApiJson, ProblemResponse},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(list_books))
        .route("/books/:id", get(get_book))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/books", post(create_book))
        .route("/books/:id/shelf", post(set_shelf))
        .route("/books/:id/rate", post(rate))
}

fn book_not_found() -> ProblemResponse {
    problem(StatusCode::NOT_FOUND, "Book not found")
}

/// Ids that are not UUIDs cannot name a book.
fn parse_book_id(raw: &str) -> Result<Uuid, ProblemResponse> {
    Uuid::parse_str(raw).map_err(|_| book_not_found())
}

#[instrument(skip(state))]
pub async fn list_books(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Query(q): Query<BookListQuery>,
) -> Result<Json<Vec<BookView>>, ProblemResponse> {
    let sort = match q.sort.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<SortKey>().map_err(|msg| {
            warn!(sort = raw, "invalid sort key");
            problem(StatusCode::BAD_REQUEST, msg)
        })?),
    };

    let rows = Book::list_for(&state.db, viewer, sort)
        .await
        .map_err(|e| internal(e, "Could not load books."))?;
    Ok(Json(rows.into_iter().map(BookView::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_book(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<String>,
) -> Result<Json<BookView>, ProblemResponse> {
    let id = parse_book_id(&id)?;
    load_view(&state, id, viewer).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn create_book(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(payload): ApiJson<CreateBookRequest>,
) -> Result<(StatusCode, HeaderMap, Json<BookView>), ProblemResponse> {
    let new = payload
        .validate()
        .map_err(|errors| validation(StatusCode::BAD_REQUEST, errors))?;

    let book = Book::create(&state.db, &new)
        .await
        .map_err(|e| internal(e, "Could not create the book."))?;
    tracing::info!(%user_id, book_id = %book.id, "book created");

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/books/{}", book.id)) {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(book.into())))
}

#[instrument(skip(state, payload))]
pub async fn set_shelf(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<SetShelfRequest>,
) -> Result<Json<BookView>, ProblemResponse> {
    let book_id = parse_book_id(&id)?;

    match set_shelf_status(&state.db, user_id, book_id, payload.status)
        .await
        .map_err(|e| internal(e, "Could not update your shelf."))?
    {
        ShelfOutcome::Updated | ShelfOutcome::Unchanged => {}
        ShelfOutcome::BookNotFound => return Err(book_not_found()),
    }

    load_view(&state, book_id, Some(user_id)).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn rate(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<RateRequest>,
) -> Result<Json<BookView>, ProblemResponse> {
    let book_id = parse_book_id(&id)?;
    let rating = payload
        .validate()
        .map_err(|errors| validation(StatusCode::BAD_REQUEST, errors))?;

    match rate_book(&state.db, user_id, book_id, rating)
        .await
        .map_err(|e| internal(e, "Could not save your rating."))?
    {
        RateOutcome::Updated | RateOutcome::Unchanged => {}
        RateOutcome::BookNotFound => return Err(book_not_found()),
    }

    load_view(&state, book_id, Some(user_id)).await.map(Json)
}

async fn load_view(
    state: &AppState,
    id: Uuid,
    viewer: Option<Uuid>,
) -> Result<BookView, ProblemResponse> {
    Book::find_for(&state.db, id, viewer)
        .await
        .map_err(|e| internal(e, "Could not load the book."))?
        .map(BookView::from)
        .ok_or_else(book_not_found)
}
