//! Identity-administration HTTP API.

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get};
use axum::{Json, Router, middleware};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::identity::{Identity, Role};
use crate::router::{IdentityView, Valid};

/// Custom middleware for authentification.
///
/// Administration requires an open session; role enforcement is left to the
/// deployment.
async fn auth(
    State(state): State<AppState>,
    req: Request,
    next: middleware::Next,
) -> Result<Response> {
    match state.sessions.restore().await? {
        Some(session) if session.authenticated => Ok(next.run(req).await),
        _ => Err(ServerError::Unauthorized),
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "Display name must be filled."))]
    pub display_name: String,
    pub role: Role,
}

/// Handler listing all identities.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<IdentityView>>> {
    let identities = state.repository.load_all().await?;
    Ok(Json(identities.iter().map(IdentityView::from).collect()))
}

/// Handler pre-provisioning an identity without a secret; its user
/// completes enrollment at first login.
pub async fn create(
    State(state): State<AppState>,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<IdentityView>)> {
    let identities = state.repository.load_all().await?;
    if identities
        .iter()
        .any(|identity| identity.email.eq_ignore_ascii_case(&body.email))
    {
        return Err(ServerError::EmailTaken);
    }

    let identity = Identity::provisioned(&body.email, &body.display_name, body.role);
    state.repository.upsert(&identity).await?;

    Ok((StatusCode::CREATED, Json(IdentityView::from(&identity))))
}

/// Handler removing an identity by id. Idempotent.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.repository.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users` goes to `list`, `POST /users` goes to `create`.
        .route("/", get(list).post(create))
        // `DELETE /users/:ID` goes to `remove`.
        .route("/{id}", delete(remove))
        .route_layer(middleware::from_fn_with_state(state, auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::*;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn authenticated_state(dir: &std::path::Path) -> AppState {
        let state = test_state(dir);
        let identity = Identity::bootstrap(
            "admin@co.test",
            &totp::generate_secret().unwrap(),
            chrono::Utc::now(),
        );
        state.repository.upsert(&identity).await.unwrap();
        state.sessions.open(&identity).await.unwrap();
        state
    }

    #[tokio::test]
    async fn administration_requires_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = app(state);

        let response = make_request(app, Method::GET, "/users", String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn provision_list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let state = authenticated_state(dir.path()).await;
        let app = app(state.clone());

        let req_body = json!({
            "email": "user@co.test",
            "displayName": "User",
            "role": "Auditor",
        })
        .to_string();
        let response =
            make_request(app.clone(), Method::POST, "/users", req_body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let created: IdentityView = serde_json::from_slice(&body).unwrap();
        assert!(!created.mfa_enrolled);
        assert!(!created.is_primary_admin);
        assert_eq!(created.role, Role::Auditor);

        // Same email again is refused.
        let response = make_request(app.clone(), Method::POST, "/users", req_body).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = make_request(app.clone(), Method::GET, "/users", String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let listed: Vec<IdentityView> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 2);

        let path = format!("/users/{}", created.id);
        let response = make_request(app.clone(), Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Removing again stays a success.
        let response = make_request(app.clone(), Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = make_request(app, Method::GET, "/users", String::new()).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let listed: Vec<IdentityView> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn provisioned_identity_lands_in_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let state = authenticated_state(dir.path()).await;
        let app = app(state);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/users",
            json!({
                "email": "user@co.test",
                "displayName": "User",
                "role": "Viewer",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(
            app,
            Method::POST,
            "/login",
            json!({ "email": "user@co.test" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let step: crate::router::login::NextStep = serde_json::from_slice(&body).unwrap();
        assert!(matches!(
            step,
            crate::router::login::NextStep::Enroll { .. }
        ));
    }
}
