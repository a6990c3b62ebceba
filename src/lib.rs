//! # librarium
//!
//! Multi-tenant library management backend.
//!
//! Libraries own a catalog of books and sell membership plans. A
//! subscription freezes the plan's terms at purchase time, and every loan
//! is admitted, returned or reported lost against those frozen terms.
//! Notifications are persisted and fanned out live; CSV exports and
//! imports run as background jobs on a Redis-backed queue.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, SSE)
//!     │
//!     ├── REST Handlers + auth (api/)
//!     │
//!     ├── Services (service/)          Worker pool (worker/)
//!     │       │                              │
//!     │       ├── Ports (ports/) ◄───────────┘
//!     │       │
//!     ├── PostgreSQL / in-memory (persistence/)
//!     ├── Redis / in-memory queue (queue/)
//!     └── Storage, identity, mail, push (adapters/)
//! ```

pub mod adapters;
pub mod api;
pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod ports;
pub mod queue;
pub mod service;
pub mod worker;
