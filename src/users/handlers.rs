use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::repo_types::User,
    books::repo_types::{ShelfStatus, UserBook},
    problem::{internal, problem, ProblemResponse},
    state::AppState,
};

pub fn users_routes() -> Router<AppState> {
    Router::new().route("/users/:id", get(get_user))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfEntry {
    pub book_id: Uuid,
    pub status: ShelfStatus,
}

/// Public profile: display name and shelf, never the email verification state.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub shelf: Vec<ShelfEntry>,
}

/// Falls back to the email when no display name was given.
pub fn display_name(user: &User) -> String {
    let name = user.name.trim();
    if name.is_empty() {
        user.email.clone()
    } else {
        name.to_string()
    }
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ProblemResponse> {
    let not_found = || problem(StatusCode::NOT_FOUND, "User not found");
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;

    let user = User::find_by_id(&state.db, id)
        .await
        .map_err(|e| internal(e, "Could not load the user."))?
        .ok_or_else(not_found)?;
    let shelf = UserBook::shelf_of(&state.db, id)
        .await
        .map_err(|e| internal(e, "Could not load the user's shelf."))?;

    Ok(Json(UserProfile {
        id: user.id,
        username: display_name(&user),
        shelf: shelf
            .into_iter()
            .map(|(book_id, status)| ShelfEntry { book_id, status })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(name: &str) -> User {
        User {
            id: Uuid::nil(),
            email: "reader@example.com".into(),
            name: name.into(),
            email_verified: Some(OffsetDateTime::now_utc()),
            password_hash: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn display_name_prefers_trimmed_name() {
        assert_eq!(display_name(&user("  Ada Lovelace ")), "Ada Lovelace");
        assert_eq!(display_name(&user("   ")), "reader@example.com");
    }

    #[test]
    fn profile_wire_shape() {
        let profile = UserProfile {
            id: Uuid::nil(),
            username: "Ada".into(),
            shelf: vec![ShelfEntry {
                book_id: Uuid::nil(),
                status: ShelfStatus::CurrentlyReading,
            }],
        };
        let v = serde_json::to_value(profile).unwrap();
        assert_eq!(v["username"], "Ada");
        assert_eq!(v["shelf"][0]["status"], "currentlyReading");
        assert!(v["shelf"][0].get("bookId").is_some());
        assert!(v.get("email").is_none());
    }
}
