//! # taskpad
//!
//! A self-hosted personal task list with live sync.
//!
//! This library provides:
//! - An HTTP API for account registration, login, and task management
//! - A per-session view-model that mirrors one user's tasks from the store
//! - A live state stream (SSE) pushed on every change
//!
//! ## Architecture
//!
//! ```text
//!   HTTP / SSE client
//!         │
//!         ▼
//!   ┌───────────┐  commands   ┌───────────┐  mutations  ┌──────────────┐
//!   │    api    │────────────▶│ panel hub │────────────▶│  task store  │
//!   │  (axum)   │◀────────────│ (actors)  │◀────────────│   (sqlite)   │
//!   └───────────┘  snapshots  └───────────┘   pushes    └──────────────┘
//! ```
//!
//! ## Request flow
//! 1. Login resolves an identity and opens a session
//! 2. The session's panel subscribes to the store, scoped to that identity
//! 3. Mutations go to the store; the panel never patches its own list
//! 4. The store pushes fresh snapshots; the panel republishes them over SSE
//!
//! ## Modules
//! - `panel`: the task list view-model and its per-session actors
//! - `store`: the task store trait and the SQLite implementation
//! - `accounts`: user accounts and credential verification
//! - `sessions`: active-session registry with sign-out broadcast

pub mod accounts;
pub mod api;
pub mod config;
pub mod panel;
pub mod sessions;
pub mod store;

pub use config::Config;
