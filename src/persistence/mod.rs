//! Persistence adapters.
//!
//! [`PgRepository`] is the production [`crate::ports::Repository`] over
//! `sqlx::PgPool`; [`InMemoryRepository`] backs tests and local runs
//! without a database. [`listener`] bridges Postgres `NOTIFY` into the
//! notification hub.

pub mod listener;
pub mod memory;
mod models;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PgRepository;
