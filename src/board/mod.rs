//! Real-time project board back-end.
//!
//! ## Overview
//!
//! Projects own ordered columns, columns own ordered cards. Every mutation
//! is validated, written to SQLite, and then pushed as a [`events::BoardEvent`]
//! to the WebSocket connections subscribed to the affected project.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    ├─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│    └─ ws.rs   (socket loop, keepalive, relay)    │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  service.rs  (BoardService: validate → write →   │
//!                       │               broadcast)                         │
//!                       │     │                          │                 │
//!                       │     v                          v                 │
//!                       │  db.rs + position.rs      dispatch.rs            │
//!                       │  (BoardDb, DbHandle)      (Broadcaster)          │
//!                       │                                │                 │
//!                       │                                v                 │
//!                       │                           registry.rs            │
//!                       │                           (ConnectionRegistry)   │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | Records, aggregate views and mutation inputs            |
//! | `validate`    | Input shape checks (`Validate` trait)                   |
//! | `events`      | `BoardEvent` wire union (`type` + `data`)               |
//! | `attachments` | Upload allow-list, size cap and local file storage      |
//!
//! ## Typical Request Flow (move a card)
//!
//! 1. `POST /api/cards/{id}/move` → `api::move_card()`
//! 2. `BoardService::move_card()` validates the target and position.
//! 3. `BoardDb::move_card()` rewrites the target column's order (and settles
//!    the source column) in one transaction.
//! 4. `Broadcaster::broadcast()` queues `card_moved` on every open
//!    connection of the project; each socket loop forwards it.

pub mod api;
pub mod attachments;
pub mod db;
pub mod dispatch;
pub mod events;
pub mod models;
pub mod position;
pub mod registry;
pub mod server;
pub mod service;
pub mod validate;
pub mod ws;
