use axum::http::StatusCode;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::flow::{AddressOutcome, CodeOutcome};
use crate::router::{Authenticated, Valid};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AddressBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CodeBody {
    #[validate(
        length(equal = 6, message = "Code must contain 6 digits."),
        custom(
            function = "crate::router::validate_code",
            message = "Code must contain digits only."
        )
    )]
    pub code: String,
}

/// Next form the client must present after an address submission.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NextStep {
    Enroll {
        secret: String,
        provisioning_uri: String,
        /// Absent when QR rendering failed; the raw secret still displays.
        qr_svg: Option<String>,
    },
    Verify,
}

/// Handler for the address form.
pub async fn address(
    State(state): State<AppState>,
    Valid(body): Valid<AddressBody>,
) -> Result<Json<NextStep>> {
    let mut flow = state
        .flow
        .try_lock()
        .map_err(|_| ServerError::AttemptInFlight)?;

    match flow.submit_address(&body.email).await? {
        AddressOutcome::Enroll {
            secret,
            provisioning_uri,
            qr_svg,
        } => Ok(Json(NextStep::Enroll {
            secret,
            provisioning_uri,
            qr_svg,
        })),
        AddressOutcome::Verify => Ok(Json(NextStep::Verify)),
        AddressOutcome::Denied => Err(ServerError::AccessDenied),
    }
}

/// Handler for the 6-digit code form, both enrollment and verification.
pub async fn code(
    State(state): State<AppState>,
    Valid(body): Valid<CodeBody>,
) -> Result<Json<Authenticated>> {
    let mut flow = state
        .flow
        .try_lock()
        .map_err(|_| ServerError::AttemptInFlight)?;

    match flow.submit_code(&body.code).await? {
        CodeOutcome::Authenticated(session) => Ok(Json(Authenticated::from(session))),
        CodeOutcome::Rejected => Err(ServerError::InvalidCode),
    }
}

/// Handler for explicit back-navigation to the address form.
pub async fn back(State(state): State<AppState>) -> Result<StatusCode> {
    let mut flow = state
        .flow
        .try_lock()
        .map_err(|_| ServerError::AttemptInFlight)?;

    flow.back();
    Ok(StatusCode::NO_CONTENT)
}
