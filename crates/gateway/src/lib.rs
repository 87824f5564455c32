//! Gateway: the HTTP and WebSocket surface of rollcall.
//!
//! Lifecycle:
//! 1. The CLI opens the contact store, the job store and the WhatsApp session
//! 2. [`state::GatewayState`] bundles them for the handlers
//! 3. [`server::serve`] runs the router until shutdown
//!
//! Registration and the admin API live in `contact_routes`, announcements in
//! `announce_routes` and session control in `whatsapp_routes`. Status changes
//! reach browsers through [`broadcast::StatusBroadcaster`] over `/ws`.

pub mod announce_routes;
pub mod auth;
pub mod auth_middleware;
pub mod broadcast;
pub mod contact_routes;
pub mod distribution;
pub mod error;
pub mod jobs;
pub mod request_throttle;
pub mod server;
pub mod state;
pub mod whatsapp_routes;
pub mod ws;
