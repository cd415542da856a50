//! Path validation for catalog-resolved asset paths.
//!
//! Absolute paths must name an existing regular file or Zarr directory.
//! Relative paths are joined under the configured data root and must
//! resolve (after following symlinks) to a descendant of that root; any
//! escape is rejected. Grounded in `_resolve_asset_path` in the original
//! vector/volume routers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::catalog_repo::CatalogRepo;
use crate::errors::CoreError;

/// Combines the catalog lookup ([`CatalogRepo`]) with path validation into
/// a single resolver used by every compute service.
pub struct AssetResolver {
    catalog: Arc<CatalogRepo>,
    data_root: PathBuf,
}

impl AssetResolver {
    pub fn new(catalog: Arc<CatalogRepo>, data_root: PathBuf) -> Self {
        AssetResolver { catalog, data_root }
    }

    pub fn resolve(
        &self,
        layer: &str,
        run_time: DateTime<Utc>,
        valid_time: DateTime<Utc>,
        variable: &str,
        level: &str,
    ) -> Result<AssetRef, CoreError> {
        let raw_path = self
            .catalog
            .resolve_path(layer, run_time, valid_time, variable, level)?;
        validate_asset_path(&raw_path, &self.data_root)
    }
}

/// A validated, canonicalized path to an on-disk (or Zarr-directory) asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRef(PathBuf);

impl AssetRef {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

/// Validates `raw_path` (as returned by the catalog) against `data_root`.
pub fn validate_asset_path(raw_path: &str, data_root: &Path) -> Result<AssetRef, CoreError> {
    let candidate = Path::new(raw_path);

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        data_root.join(candidate)
    };

    if !joined.exists() {
        return Err(CoreError::NotFound(format!(
            "asset path does not exist: {}",
            joined.display()
        )));
    }

    let is_zarr_dir = joined.is_dir()
        && joined
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zarr"))
            .unwrap_or(false);
    if !joined.is_file() && !is_zarr_dir {
        return Err(CoreError::InvalidRequest(format!(
            "asset path is neither a regular file nor a Zarr directory: {}",
            joined.display()
        )));
    }

    let canonical_root = data_root
        .canonicalize()
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;
    let canonical_path = joined
        .canonicalize()
        .map_err(|err| CoreError::internal(anyhow::anyhow!(err)))?;

    if candidate.is_absolute() {
        // Absolute paths are trusted as-is (they come from the catalog, a
        // thin collaborator we don't re-sandbox) but must still exist.
        return Ok(AssetRef(canonical_path));
    }

    if !canonical_path.starts_with(&canonical_root) {
        return Err(CoreError::InvalidRequest(format!(
            "asset path escapes data root: {}",
            joined.display()
        )));
    }

    Ok(AssetRef(canonical_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn relative_path_within_root_is_accepted() {
        let root = tempfile::tempdir().unwrap();
        let file_path = root.path().join("run").join("asset.nc");
        fs::create_dir_all(file_path.parent().unwrap()).unwrap();
        fs::write(&file_path, b"data").unwrap();

        let resolved = validate_asset_path("run/asset.nc", root.path()).unwrap();
        assert!(resolved.as_path().ends_with("asset.nc"));
    }

    #[test]
    fn relative_path_escaping_root_via_symlink_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.nc");
        fs::write(&secret, b"data").unwrap();

        let link_path = root.path().join("escape.nc");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&secret, &link_path).unwrap();

        let result = validate_asset_path("escape.nc", root.path());
        assert!(result.is_err());
    }

    #[test]
    fn missing_path_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let result = validate_asset_path("nope.nc", root.path());
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
