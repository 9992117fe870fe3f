//! Learner progress service for the cybersecurity training portal: enrollment
//! and lab-run tracking, catalog lookups with fixture fallback, and the
//! dashboard views built on top of them.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod enrollments;
pub mod error;
pub mod lab_runs;
pub mod models;
pub mod preferences;
pub mod progress;
pub mod routes;
mod store;

use crate::auth::AuthStore;
use crate::catalog::CatalogClient;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::{Db, MemoryCells};
use crate::enrollments::EnrollmentStore;
use crate::error::StoreError;
use crate::lab_runs::LabRunStore;
use crate::preferences::Preferences;

/// Everything the handlers share. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub enrollments: Arc<EnrollmentStore>,
    pub lab_runs: Arc<LabRunStore>,
    pub prefs: Preferences,
    pub auth: AuthStore,
    pub catalog: CatalogClient,
}

impl AppState {
    pub fn new(cells: Db, catalog: CatalogClient, clock: Clock) -> Result<Self, StoreError> {
        Ok(Self {
            enrollments: Arc::new(EnrollmentStore::open(cells.clone(), clock)?),
            lab_runs: Arc::new(LabRunStore::open(cells.clone(), clock)?),
            prefs: Preferences::new(cells.clone()),
            auth: AuthStore::new(cells, clock),
            catalog,
        })
    }

    /// State backed by the data directory named in `config`.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let cells = db::connect(&config.data_dir)?;
        let catalog = CatalogClient::new(config.catalog_base_url.clone(), config.catalog_timeout)?;
        if !catalog.is_configured() {
            tracing::warn!("CATALOG_API_URL not set, serving fixture catalog");
        }
        Ok(Self::new(cells, catalog, Clock::System)?)
    }

    /// Ephemeral state, for tests and demos.
    pub fn in_memory(catalog: CatalogClient, clock: Clock) -> Result<Self, StoreError> {
        Self::new(MemoryCells::shared(), catalog, clock)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
