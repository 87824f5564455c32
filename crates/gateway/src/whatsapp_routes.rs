//! Admin control of the WhatsApp session and manual distribution.

use {
    axum::{Json, extract::State},
    rollcall_contacts::validate,
    rollcall_whatsapp::LoginMethod,
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::info,
};

use crate::{
    error::{ApiError, OrApiError},
    server::AppState,
};

/// `GET /api/whatsapp/status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let gw = &state.gateway;
    let snapshot = gw.broadcaster.snapshot();
    Json(json!({
        "status": snapshot.state.as_str(),
        "connected": gw.session.is_connected(),
        "ownJid": gw.session.own_jid(),
        "qr": snapshot.qr,
        "pairingCode": snapshot.pairing_code,
    }))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoginKind {
    #[default]
    Qr,
    PairingCode,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NewSessionBody {
    pub method: LoginKind,
    pub phone: Option<String>,
}

/// `POST /api/whatsapp/newSession`: drop the current link and start a fresh
/// login. The QR or pairing code arrives over `/ws`.
pub async fn new_session(
    State(state): State<AppState>,
    payload: Option<Json<NewSessionBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let login = match body.method {
        LoginKind::Qr => LoginMethod::Qr,
        LoginKind::PairingCode => {
            let raw = body.phone.as_deref().unwrap_or_default();
            if raw.trim().is_empty() {
                return Err(ApiError::bad_request(
                    "Phone number is required for pairing code login",
                ));
            }
            LoginMethod::PairingCode {
                phone: validate::normalize_phone(raw).or_api("Invalid phone number")?,
            }
        },
    };
    info!(method = ?body.method, "new WhatsApp session requested");
    state
        .gateway
        .session
        .new_session(login)
        .or_api("Failed to start a new session")?;
    Ok(Json(json!({ "message": "New session requested" })))
}

/// `POST /api/whatsapp/logout`
pub async fn logout(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.gateway.session.logout().or_api("Failed to log out")?;
    info!("WhatsApp logout requested");
    Ok(Json(json!({ "message": "Logged out" })))
}

/// `POST /api/sendVCF`: regenerate the contact file and post it to the
/// channel.
pub async fn send_vcf(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let count = state
        .gateway
        .distributor
        .distribute()
        .await
        .or_api("Failed to send contact file")?;
    Ok(Json(json!({ "message": "Contact file sent", "contacts": count })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendEmailsBody {
    pub subject: Option<String>,
}

/// `POST /api/sendEmails`: mail the contact file to every reachable contact.
pub async fn send_emails(
    State(state): State<AppState>,
    payload: Option<Json<SendEmailsBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let subject = body.subject.as_deref().filter(|s| !s.trim().is_empty());
    let report = state
        .gateway
        .distributor
        .email_contacts(subject)
        .await
        .or_api("Failed to send emails")?;

    let mut reply = json!({ "message": "Emails sent" });
    if let (Value::Object(map), Ok(Value::Object(fields))) =
        (&mut reply, serde_json::to_value(&report))
    {
        map.extend(fields);
    }
    Ok(Json(reply))
}
