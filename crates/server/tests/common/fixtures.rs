//! Test fixtures for images, catalogs and solver files.

use bytes::Bytes;
use skycat_core::CatalogKind;
use skycat_metadata::MetadataStore;
use skycat_metadata::models::{CatalogObjectRow, NewImage};
use skycat_metadata::repos::{CatalogRepo, ImageRepo};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique file paths.
static PATH_COUNTER: AtomicU64 = AtomicU64::new(1);

/// FITS header record length.
const CARD_LEN: usize = 80;
/// FITS block length.
const BLOCK_LEN: usize = 2880;

/// Generate a unique light frame path under `prefix`.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn unique_path(prefix: &str) -> String {
    let n = PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}/light_{:05}.fits", prefix.trim_end_matches('/'), n)
}

/// Insert an unsolved 6000x4000 light frame.
#[allow(dead_code)]
pub async fn insert_image(metadata: &dyn MetadataStore, path: &str) -> i64 {
    insert_image_sized(metadata, path, Some((6000, 4000))).await
}

/// Insert an unsolved light frame with optional dimensions.
#[allow(dead_code)]
pub async fn insert_image_sized(
    metadata: &dyn MetadataStore,
    path: &str,
    size: Option<(i32, i32)>,
) -> i64 {
    metadata
        .insert_image(&NewImage {
            file_path: path.to_string(),
            subtype: Some("LIGHT".to_string()),
            width_pixels: size.map(|(w, _)| w),
            height_pixels: size.map(|(_, h)| h),
            ..NewImage::default()
        })
        .await
        .expect("Failed to insert image")
}

/// Insert an image whose solution came from its own file header.
#[allow(dead_code)]
pub async fn insert_header_solved_image(metadata: &dyn MetadataStore, path: &str) -> i64 {
    metadata
        .insert_image(&NewImage {
            file_path: path.to_string(),
            subtype: Some("LIGHT".to_string()),
            width_pixels: Some(6000),
            height_pixels: Some(4000),
            is_plate_solved: true,
            plate_solve_source: Some("HEADER".to_string()),
            ra_center_degrees: Some(83.82),
            dec_center_degrees: Some(-5.39),
            field_radius_degrees: Some(1.2),
            pixel_scale_arcsec: Some(1.8),
            rotation_degrees: Some(-92.0),
            parity: Some(1),
            ..NewImage::default()
        })
        .await
        .expect("Failed to insert image")
}

#[allow(dead_code)]
pub fn catalog_object(kind: CatalogKind, designation: &str, ra: f64, dec: f64) -> CatalogObjectRow {
    CatalogObjectRow {
        catalog_kind: kind.as_str().to_string(),
        designation: designation.to_string(),
        common_name: None,
        object_type: None,
        constellation: Some("Ori".to_string()),
        magnitude: None,
        ra_degrees: ra,
        dec_degrees: dec,
    }
}

/// Seed a handful of objects around the Orion Nebula plus one far away.
///
/// Within 1.2 degrees of M42: M42, M43, NGC 1977 and Hatysa. Betelgeuse
/// is well outside.
#[allow(dead_code)]
pub async fn seed_orion_catalogs(metadata: &dyn MetadataStore) {
    let objects = [
        catalog_object(CatalogKind::Messier, "M42", 83.8221, -5.3911),
        catalog_object(CatalogKind::Messier, "M43", 83.8792, -5.27),
        catalog_object(CatalogKind::Ngc, "NGC 1977", 83.85, -4.84),
        catalog_object(CatalogKind::Ngc, "NGC 1976", 83.8221, -5.3911),
        catalog_object(CatalogKind::NamedStar, "Hatysa", 83.8583, -5.9099),
        catalog_object(CatalogKind::NamedStar, "Betelgeuse", 88.7929, 7.4071),
    ];
    for object in &objects {
        metadata
            .upsert_catalog_object(object)
            .await
            .expect("Failed to seed catalog object");
    }
}

/// Build a FITS primary header from `(keyword, value)` pairs.
///
/// Values are written verbatim, so strings must carry their own quotes.
#[allow(dead_code)]
pub fn fits_header(cards: &[(&str, &str)]) -> Bytes {
    let mut out = String::new();
    let mut push = |card: String| {
        out.push_str(&format!("{:<width$}", card, width = CARD_LEN));
    };
    push(format!("{:<8}= {:>20}", "SIMPLE", "T"));
    for (keyword, value) in cards {
        push(format!("{:<8}= {:>20}", keyword, value));
    }
    push("END".to_string());

    let padded = out.len().div_ceil(BLOCK_LEN) * BLOCK_LEN;
    let mut bytes = out.into_bytes();
    bytes.resize(padded, b' ');
    Bytes::from(bytes)
}

/// The TAN-SIP solution file of the Orion field.
#[allow(dead_code)]
pub fn orion_wcs_file() -> Bytes {
    fits_header(&[
        ("CTYPE1", "'RA---TAN-SIP'"),
        ("CTYPE2", "'DEC--TAN-SIP'"),
        ("CRVAL1", "83.82"),
        ("CRVAL2", "-5.39"),
        ("CRPIX1", "3000.5"),
        ("CRPIX2", "2000.5"),
        ("CD1_1", "-1.7E-05"),
        ("CD1_2", "5.0E-04"),
        ("CD2_1", "-5.0E-04"),
        ("CD2_2", "-1.7E-05"),
        ("IMAGEW", "6000"),
        ("IMAGEH", "4000"),
        ("A_ORDER", "2"),
        ("A_0_2", "1.0E-08"),
        ("B_ORDER", "2"),
        ("B_2_0", "1.0E-08"),
    ])
}

/// A tiny JPEG stand-in for annotated previews.
#[allow(dead_code)]
pub fn preview_bytes() -> Bytes {
    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9])
}
