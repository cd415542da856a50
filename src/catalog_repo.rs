//! Catalog lookup: given `(run_time, valid_time, variable, level)`, resolve
//! the highest-versioned matching asset path.
//!
//! Grounded in `fixes_repo.rs`'s diesel-repo-over-pooled-connection shape;
//! the catalog DB itself is a thin collaborator per the scope boundary, so
//! this module owns only the query and its error mapping.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};

use crate::errors::CoreError;
use crate::schema::catalog_assets;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = catalog_assets)]
pub struct CatalogAssetRow {
    pub id: i64,
    pub run_time: DateTime<Utc>,
    pub valid_time: DateTime<Utc>,
    pub variable: String,
    pub level: String,
    pub layer: String,
    pub path: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

/// Owns the catalog query only; [`crate::asset_resolver::AssetResolver`]
/// layers path validation on top of it.
pub struct CatalogRepo {
    pool: PgPool,
}

impl CatalogRepo {
    pub fn new(pool: PgPool) -> Self {
        CatalogRepo { pool }
    }

    /// Resolves the highest-versioned asset row matching the given
    /// coordinates, case-insensitively on `variable`/`level`. A database
    /// error maps to `UpstreamUnavailable`; zero rows maps to `NotFound`.
    pub fn resolve_path(
        &self,
        layer: &str,
        run_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
        variable: &str,
        level: &str,
    ) -> Result<String, CoreError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| CoreError::UpstreamUnavailable(err.to_string()))?;

        let row: Option<CatalogAssetRow> = catalog_assets::table
            .filter(catalog_assets::layer.eq(layer))
            .filter(catalog_assets::run_time.eq(run_time))
            .filter(catalog_assets::valid_time.eq(valid_time))
            // variable/level are stored lowercase at ingest time, so a
            // lowercased equality filter is equivalent to lower(col) == ….
            .filter(catalog_assets::variable.eq(variable.to_lowercase()))
            .filter(catalog_assets::level.eq(level.to_lowercase()))
            .order(catalog_assets::version.desc())
            .select(CatalogAssetRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(|err| CoreError::UpstreamUnavailable(err.to_string()))?;

        match row {
            Some(row) => Ok(row.path),
            None => Err(CoreError::NotFound(format!(
                "no asset for layer={layer} run={run_time} valid={valid_time} variable={variable} level={level}"
            ))),
        }
    }
}
