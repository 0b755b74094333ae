//! JSON loader for the reference catalogs.
//!
//! The input is an array of objects:
//! `{"designation", "common_name"?, "object_type"?, "constellation"?,
//! "magnitude"?, "ra_degrees", "dec_degrees"}`.

use serde::{Deserialize, Serialize};
use skycat_core::CatalogKind;
use skycat_metadata::models::CatalogObjectRow;
use skycat_metadata::repos::CatalogRepo;
use skycat_metadata::{MetadataError, MetadataStore};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

/// One catalog entry as it appears in the import file.
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    pub designation: String,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub constellation: Option<String>,
    #[serde(default)]
    pub magnitude: Option<f64>,
    pub ra_degrees: f64,
    pub dec_degrees: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub catalog: String,
    pub imported: usize,
    /// Entries rejected for an empty designation or out-of-range coordinates.
    pub rejected: usize,
}

/// Upsert every entry of a JSON catalog file.
pub async fn import_file(
    metadata: &dyn MetadataStore,
    kind: CatalogKind,
    path: &Path,
) -> Result<ImportReport, ImportError> {
    let raw = tokio::fs::read(path).await?;
    let entries: Vec<CatalogEntry> = serde_json::from_slice(&raw)?;
    import_entries(metadata, kind, entries).await
}

/// Upsert catalog entries of one kind.
pub async fn import_entries(
    metadata: &dyn MetadataStore,
    kind: CatalogKind,
    entries: Vec<CatalogEntry>,
) -> Result<ImportReport, ImportError> {
    let mut report = ImportReport {
        catalog: kind.as_str().to_string(),
        ..ImportReport::default()
    };

    for entry in entries {
        let designation = entry.designation.trim();
        let valid = !designation.is_empty()
            && (0.0..360.0).contains(&entry.ra_degrees)
            && (-90.0..=90.0).contains(&entry.dec_degrees);
        if !valid {
            tracing::warn!(
                catalog = kind.as_str(),
                designation = %entry.designation,
                ra = entry.ra_degrees,
                dec = entry.dec_degrees,
                "Rejecting catalog entry"
            );
            report.rejected += 1;
            continue;
        }

        let row = CatalogObjectRow {
            catalog_kind: kind.as_str().to_string(),
            designation: designation.to_string(),
            common_name: entry.common_name,
            object_type: entry.object_type,
            constellation: entry.constellation,
            magnitude: entry.magnitude,
            ra_degrees: entry.ra_degrees,
            dec_degrees: entry.dec_degrees,
        };
        metadata.upsert_catalog_object(&row).await?;
        report.imported += 1;
    }

    tracing::info!(
        catalog = kind.as_str(),
        imported = report.imported,
        rejected = report.rejected,
        "Catalog import complete"
    );
    Ok(report)
}
