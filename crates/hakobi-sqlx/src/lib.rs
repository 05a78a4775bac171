//! PostgreSQL broker transport for hakobi.
//!
//! Jobs live in one `hakobi_jobs` table. Claims use `FOR UPDATE SKIP LOCKED`
//! plus a lease token and `leased_until` window, so a crashed worker's jobs
//! become eligible again without any coordinator. All finalizers check the
//! token and surface `LostLease` instead of double-committing.

pub use sqlx::PgPool;

pub use hakobi_core;

mod error;
mod migrate;
mod queries;

pub mod backend;
pub mod client;

pub use backend::{BackEnd, PgLeaseContext, PostgresDriver};
pub use client::Client;
pub use error::{Error, ErrorKind};
pub use migrate::migrate;
