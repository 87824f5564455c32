//! Registration and admin CRUD over contacts.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Multipart, Query, State, rejection::JsonRejection},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    rollcall_contacts::{
        ContactFilter, ContactPatch, export::render_csv, import_vcards, validate,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use crate::{
    error::{ApiError, OrApiError},
    server::AppState,
};

const REGISTER_FAILED: &str = "Failed to register user";
const NOT_ON_WHATSAPP: &str = "Phone number is not registered on WhatsApp";

type ApiResult<T = Json<Value>> = Result<T, ApiError>;

fn message(text: &str) -> Json<Value> {
    Json(json!({ "message": text }))
}

/// Normalise a phone number taken from a request body or query.
fn request_phone(raw: &str) -> ApiResult<String> {
    if raw.trim().is_empty() {
        return Err(ApiError::bad_request("Phone number is required"));
    }
    validate::normalize_phone(raw).or_api("Invalid phone number")
}

// ── Public ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterBody {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// `POST /api/register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let gw = &state.gateway;
    let new_contact =
        validate::validate_registration(&body.name, &body.phone, &body.email).or_api(REGISTER_FAILED)?;

    // Early answer for the common case; the insert below still decides races.
    if gw
        .contacts
        .find_one(&new_contact.phone)
        .await
        .or_api(REGISTER_FAILED)?
        .is_some()
    {
        return Err(ApiError::conflict("User already registered"));
    }

    if gw.settings.verify_registration {
        match gw.session.check_number(&new_contact.phone).await {
            Ok(Some(true)) => {},
            Ok(Some(false)) => return Err(ApiError::bad_request(NOT_ON_WHATSAPP)),
            Ok(None) => {
                warn!(phone = %new_contact.phone, "no WhatsApp session to verify registration");
                return Err(ApiError::internal(REGISTER_FAILED));
            },
            Err(
                e @ (rollcall_whatsapp::Error::NoSession
                | rollcall_whatsapp::Error::StaleHandle { .. }),
            ) => {
                warn!(phone = %new_contact.phone, error = %e, "WhatsApp session lost during registration");
                return Err(ApiError::internal(REGISTER_FAILED));
            },
            Err(e) => {
                warn!(phone = %new_contact.phone, error = %e, "WhatsApp number lookup failed");
                return Err(ApiError::bad_request(NOT_ON_WHATSAPP));
            },
        }
    }

    // Insert and append under the file lock so a concurrent rebuild either
    // sees this contact or runs after the append.
    let writer = gw.export.writer().await;
    let contact = gw.contacts.insert(new_contact).await.or_api(REGISTER_FAILED)?;
    info!(phone = %contact.phone, "contact registered");

    if let Err(e) = writer.append(&contact).await {
        warn!(error = %e, phone = %contact.phone, "failed to append contact card");
    }
    drop(writer);
    if gw.settings.send_on_register {
        let distributor = Arc::clone(&gw.distributor);
        tokio::spawn(async move {
            if let Err(e) = distributor.send_export().await {
                warn!(error = %e, "failed to send contact file after registration");
            }
        });
    }

    Ok(message("Registered successfully"))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckContactsQuery {
    pub phone: Option<String>,
}

/// `GET /api/checkContacts?phone=`: how many contacts a registered user
/// will get from the shared file.
pub async fn check_contacts(
    State(state): State<AppState>,
    Query(query): Query<CheckContactsQuery>,
) -> ApiResult {
    let gw = &state.gateway;
    let phone = request_phone(query.phone.as_deref().unwrap_or_default())?;
    let Some(me) = gw
        .contacts
        .find_one(&phone)
        .await
        .or_api("Failed to check contacts")?
    else {
        return Err(ApiError::not_found("User not found"));
    };

    let filter = ContactFilter::exportable(gw.distributor.settings().include_opted_out);
    let total = gw
        .contacts
        .count(&filter)
        .await
        .or_api("Failed to check contacts")?;
    let others = if filter.matches(&me) {
        total.saturating_sub(1)
    } else {
        total
    };
    Ok(Json(json!({ "contacts": others, "totalContacts": total })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdminLoginBody {
    pub password: String,
}

/// `POST /api/adminLogin`
pub async fn admin_login(
    State(state): State<AppState>,
    payload: Result<Json<AdminLoginBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let ok = state
        .gateway
        .admin_password
        .as_ref()
        .is_some_and(|pw| pw.verify(&body.password));
    if !ok {
        warn!("failed admin login");
        return Err(ApiError::unauthorized("Invalid admin password"));
    }
    Ok(message("Login successful"))
}

// ── Admin ────────────────────────────────────────────────────────────────────

/// `GET /api/getUsers`
pub async fn get_users(State(state): State<AppState>) -> ApiResult<Response> {
    let contacts = state
        .gateway
        .contacts
        .find(&ContactFilter::all())
        .await
        .or_api("Failed to fetch users")?;
    Ok(Json(contacts).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PhoneBody {
    pub phone: String,
}

/// `POST /api/removeUser`
pub async fn remove_user(
    State(state): State<AppState>,
    payload: Result<Json<PhoneBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let gw = &state.gateway;
    let phone = request_phone(&body.phone)?;
    let removed = gw
        .contacts
        .delete(&ContactFilter::by_phone(&phone))
        .await
        .or_api("Failed to remove user")?;
    if removed > 0 {
        info!(phone = %phone, "contact removed");
        gw.refresh_export().await;
    }
    Ok(message("User removed"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditUserBody {
    pub old_phone: String,
    pub new_name: String,
    pub new_phone: String,
    pub new_email: Option<String>,
}

/// `POST /api/editUser`
pub async fn edit_user(
    State(state): State<AppState>,
    payload: Result<Json<EditUserBody>, JsonRejection>,
) -> ApiResult {
    const FAILED: &str = "Failed to update user";

    let Json(body) = payload?;
    let gw = &state.gateway;
    if body.old_phone.trim().is_empty()
        || body.new_name.trim().is_empty()
        || body.new_phone.trim().is_empty()
    {
        return Err(ApiError::bad_request("All fields are required"));
    }
    let old_phone = request_phone(&body.old_phone)?;
    let patch = ContactPatch {
        name: Some(validate::normalize_name(&body.new_name).or_api(FAILED)?),
        phone: Some(validate::normalize_phone(&body.new_phone).or_api(FAILED)?),
        email: body
            .new_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(validate::normalize_email)
            .transpose()
            .or_api(FAILED)?,
        ..ContactPatch::default()
    };

    match gw.contacts.update(&old_phone, &patch).await {
        Ok(Some(contact)) => {
            info!(old_phone = %old_phone, phone = %contact.phone, "contact updated");
        },
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(rollcall_contacts::Error::Conflict { .. }) => {
            return Err(ApiError::conflict(
                "Phone number is already registered to another user",
            ));
        },
        Err(e) => return Err(ApiError::from_error(e.into(), FAILED)),
    }
    gw.refresh_export().await;
    Ok(message("User updated successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptOutBody {
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_true")]
    pub opted_out: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkJoinedBody {
    #[serde(default)]
    pub phone: String,
    #[serde(default = "default_true")]
    pub joined: bool,
}

fn default_true() -> bool {
    true
}

async fn apply_patch(
    state: &AppState,
    raw_phone: &str,
    patch: ContactPatch,
    done: &'static str,
) -> ApiResult {
    let gw = &state.gateway;
    let phone = request_phone(raw_phone)?;
    let updated = gw
        .contacts
        .update(&phone, &patch)
        .await
        .or_api("Failed to update user")?;
    if updated.is_none() {
        return Err(ApiError::not_found("User not found"));
    }
    gw.refresh_export().await;
    Ok(message(done))
}

/// `POST /api/optOut`
pub async fn opt_out(
    State(state): State<AppState>,
    payload: Result<Json<OptOutBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let patch = ContactPatch {
        opted_out: Some(body.opted_out),
        ..ContactPatch::default()
    };
    let done = if body.opted_out {
        "User opted out"
    } else {
        "User opted back in"
    };
    apply_patch(&state, &body.phone, patch, done).await
}

/// `POST /api/markJoined`
pub async fn mark_joined(
    State(state): State<AppState>,
    payload: Result<Json<MarkJoinedBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let patch = ContactPatch {
        joined_channel: Some(body.joined),
        ..ContactPatch::default()
    };
    apply_patch(&state, &body.phone, patch, "Channel membership updated").await
}

/// Largest accepted vCard upload.
pub const MAX_VCF_UPLOAD: usize = 10 * 1024 * 1024;

/// `POST /api/uploadVCF` (multipart field `file`)
pub async fn upload_vcf(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult {
    let gw = &state.gateway;
    let mut file = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed vCard upload");
                return Err(ApiError::bad_request("Invalid upload"));
            },
        };
        if field.name() != Some("file") {
            continue;
        }
        match field.bytes().await {
            Ok(bytes) => file = Some(bytes),
            Err(e) => {
                warn!(error = %e, "failed to read vCard upload");
                return Err(ApiError::bad_request("Invalid upload"));
            },
        }
    }
    let Some(bytes) = file.filter(|b| !b.is_empty()) else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    let text = String::from_utf8_lossy(&bytes);
    let summary = import_vcards(gw.contacts.as_ref(), &text)
        .await
        .or_api("Failed to import contacts")?;
    info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        "vCard file imported"
    );
    gw.refresh_export().await;
    Ok(Json(json!({
        "message": "Contacts imported",
        "created": summary.created,
        "updated": summary.updated,
        "skipped": summary.skipped,
    })))
}

/// `GET /api/exportUsers`: every contact as a CSV attachment.
pub async fn export_users(State(state): State<AppState>) -> ApiResult<Response> {
    let contacts = state
        .gateway
        .contacts
        .find(&ContactFilter::all())
        .await
        .or_api("Failed to export users")?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
        ],
        render_csv(&contacts),
    )
        .into_response())
}
