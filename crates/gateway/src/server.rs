use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{DefaultBodyLimit, State},
        http::StatusCode,
        middleware,
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        services::{ServeDir, ServeFile},
        trace::TraceLayer,
    },
    tracing::info,
};

use crate::{
    announce_routes, auth_middleware::require_admin, contact_routes, request_throttle::throttle_gate,
    state::GatewayState, whatsapp_routes, ws::ws_upgrade_handler,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the HTTP router (shared between production startup and tests).
pub fn build_app(gateway: Arc<GatewayState>) -> Router {
    let public_dir = gateway.settings.public_dir.clone();
    let state = AppState { gateway };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/api/getUsers", get(contact_routes::get_users))
        .route("/api/removeUser", post(contact_routes::remove_user))
        .route("/api/editUser", post(contact_routes::edit_user))
        .route("/api/optOut", post(contact_routes::opt_out))
        .route("/api/markJoined", post(contact_routes::mark_joined))
        .route(
            "/api/uploadVCF",
            post(contact_routes::upload_vcf)
                .layer(DefaultBodyLimit::max(contact_routes::MAX_VCF_UPLOAD)),
        )
        .route("/api/exportUsers", get(contact_routes::export_users))
        .route(
            "/api/scheduleAnnouncement",
            post(announce_routes::schedule_announcement),
        )
        .route("/api/announcements", get(announce_routes::list_announcements))
        .route(
            "/api/cancelAnnouncement",
            post(announce_routes::cancel_announcement),
        )
        .route("/api/sendVCF", post(whatsapp_routes::send_vcf))
        .route("/api/sendEmails", post(whatsapp_routes::send_emails))
        .route("/api/whatsapp/status", get(whatsapp_routes::status))
        .route("/api/whatsapp/newSession", post(whatsapp_routes::new_session))
        .route("/api/whatsapp/logout", post(whatsapp_routes::logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/register", post(contact_routes::register))
        .route("/api/checkContacts", get(contact_routes::check_contacts))
        .route("/api/adminLogin", post(contact_routes::admin_login))
        .merge(admin)
        .route_service("/admin", ServeFile::new(public_dir.join("admin.html")))
        .fallback_service(ServeDir::new(public_dir))
        .layer(middleware::from_fn_with_state(state.clone(), throttle_gate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = &state.gateway.session;
    let whatsapp = session.state().as_str();
    if session.is_connected() {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "Bot is running", "whatsapp": whatsapp })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "status": "Bot is not connected", "whatsapp": whatsapp })),
        )
    }
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<GatewayState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "rollcall listening");
    }
    let app = build_app(gateway);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
