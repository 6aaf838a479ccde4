use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{FetchError, RawVariantRecord};
use crate::util::split_list;

/// One row of the `online_products` table: a variant joined with its product.
///
/// Prices are cast to text in SQL so REAL and TEXT columns both decode.
#[derive(Debug, FromRow)]
struct SnapshotRow {
    product_id: Option<i64>,
    title: Option<String>,
    handle: Option<String>,
    vendor: Option<String>,
    product_type: Option<String>,
    status: Option<String>,
    body_html: Option<String>,
    tags: Option<String>,
    collections: Option<String>,
    images: Option<String>,
    star_rating: Option<String>,
    variant_id: i64,
    variant_title: Option<String>,
    sku: Option<String>,
    barcode: Option<String>,
    price: Option<String>,
    compare_at_price: Option<String>,
    inventory_quantity: Option<i64>,
    option1: Option<String>,
    option2: Option<String>,
    option3: Option<String>,
    mf_age_group: Option<String>,
    mf_condition: Option<String>,
    mf_gender: Option<String>,
    mf_mpn: Option<String>,
    mf_custom_label_0: Option<String>,
    mf_custom_label_1: Option<String>,
    mf_custom_label_2: Option<String>,
    mf_custom_label_3: Option<String>,
    mf_custom_label_4: Option<String>,
    mf_size_system: Option<String>,
    mf_size_type: Option<String>,
    mf_color: Option<String>,
    mf_size: Option<String>,
    mf_material: Option<String>,
    mf_google_product_category: Option<String>,
}

/// No stock filter here: exclusion is the model builder's job, for both sources.
const SNAPSHOT_QUERY: &str = r#"
    SELECT product_id, title, handle, vendor, product_type, status, body_html,
           tags, collections, images, CAST(star_rating AS TEXT) AS star_rating,
           variant_id, variant_title, sku, barcode,
           CAST(price AS TEXT) AS price,
           CAST(compare_at_price AS TEXT) AS compare_at_price,
           inventory_quantity, option1, option2, option3,
           mf_age_group, mf_condition, mf_gender, mf_mpn,
           mf_custom_label_0, mf_custom_label_1, mf_custom_label_2,
           mf_custom_label_3, mf_custom_label_4,
           mf_size_system, mf_size_type, mf_color, mf_size, mf_material,
           mf_google_product_category
    FROM online_products
    ORDER BY product_id, variant_id
"#;

/// Pre-synchronized SQLite copy of the catalog, one row per variant.
///
/// Stands in for the live API without changing anything downstream.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn fetch_all(&self) -> Result<Vec<RawVariantRecord>, FetchError> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let rows: Vec<SnapshotRow> = sqlx::query_as(SNAPSHOT_QUERY).fetch_all(&pool).await?;
        pool.close().await;

        tracing::info!(
            path = %self.path.display(),
            rows = rows.len(),
            "Loaded catalog snapshot"
        );
        Ok(rows.into_iter().map(SnapshotRow::into_record).collect())
    }
}

impl SnapshotRow {
    fn into_record(self) -> RawVariantRecord {
        let product_id = self.product_id.and_then(|id| u64::try_from(id).ok());

        let mut product_attributes = BTreeMap::new();
        if let Some(rating) = self.star_rating.filter(|r| r.trim().parse::<f64>().is_ok()) {
            product_attributes.insert("star_rating".to_string(), rating.trim().to_string());
        }

        let variant_attributes = [
            ("age_group", self.mf_age_group),
            ("condition", self.mf_condition),
            ("gender", self.mf_gender),
            ("mpn", self.mf_mpn),
            ("custom_label_0", self.mf_custom_label_0),
            ("custom_label_1", self.mf_custom_label_1),
            ("custom_label_2", self.mf_custom_label_2),
            ("custom_label_3", self.mf_custom_label_3),
            ("custom_label_4", self.mf_custom_label_4),
            ("size_system", self.mf_size_system),
            ("size_type", self.mf_size_type),
            ("color", self.mf_color),
            ("size", self.mf_size),
            ("material", self.mf_material),
            ("google_product_category", self.mf_google_product_category),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), v))
        })
        .collect();

        let options = [self.option1, self.option2, self.option3]
            .into_iter()
            .flatten()
            .collect();

        RawVariantRecord {
            product_id,
            title: self.title.unwrap_or_default(),
            handle: self.handle.unwrap_or_default(),
            vendor: self.vendor.unwrap_or_default(),
            product_type: self.product_type.unwrap_or_default(),
            status: self.status,
            body_html: self.body_html.unwrap_or_default(),
            // The snapshot stores both lists as comma-joined text
            tags: split_list(self.tags.as_deref(), ','),
            collections: split_list(self.collections.as_deref(), ','),
            images: self.images,
            product_attributes,
            variant_id: u64::try_from(self.variant_id).unwrap_or_default(),
            variant_title: self.variant_title.unwrap_or_default(),
            sku: self.sku,
            barcode: self.barcode,
            price: self.price,
            compare_at_price: self.compare_at_price,
            inventory_quantity: self.inventory_quantity,
            options,
            variant_attributes,
        }
    }
}

/// Schema of the snapshot table, used to build fixtures.
pub const SNAPSHOT_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS online_products (
        product_id INTEGER,
        title TEXT,
        handle TEXT,
        vendor TEXT,
        product_type TEXT,
        status TEXT,
        body_html TEXT,
        tags TEXT,
        collections TEXT,
        images TEXT,
        star_rating REAL,
        variant_id INTEGER NOT NULL,
        variant_title TEXT,
        sku TEXT,
        barcode TEXT,
        price REAL,
        compare_at_price REAL,
        inventory_quantity INTEGER,
        option1 TEXT,
        option2 TEXT,
        option3 TEXT,
        mf_age_group TEXT,
        mf_condition TEXT,
        mf_gender TEXT,
        mf_mpn TEXT,
        mf_custom_label_0 TEXT,
        mf_custom_label_1 TEXT,
        mf_custom_label_2 TEXT,
        mf_custom_label_3 TEXT,
        mf_custom_label_4 TEXT,
        mf_size_system TEXT,
        mf_size_type TEXT,
        mf_color TEXT,
        mf_size TEXT,
        mf_material TEXT,
        mf_google_product_category TEXT
    )
"#;

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_snapshot(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shopfeed_snapshot_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.db");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(SNAPSHOT_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO online_products
                (product_id, title, handle, vendor, status, tags, images, star_rating,
                 variant_id, price, compare_at_price, inventory_quantity, option1, mf_gender, mf_color)
             VALUES
                (7, 'Samba', 'samba', 'Adidas', 'active', 'a, b', '[{\"src\":\"https://cdn/s.jpg\"}]', 4.5,
                 71, 120.5, NULL, 0, '39', 'female', ''),
                (3, 'Chuck', 'chuck', 'Converse', 'active', NULL, NULL, NULL,
                 32, '59.90', '79.90', NULL, '42', NULL, 'Nero'),
                (3, 'Chuck', 'chuck', 'Converse', 'active', NULL, NULL, NULL,
                 31, '59.90', NULL, 2, '41', NULL, NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn test_snapshot_rows_become_records() {
        let path = create_snapshot("rows").await;
        let records = SnapshotSource::new(&path).fetch_all().await.unwrap();

        // Ordered by product_id then variant_id; out-of-stock rows are kept
        let ids: Vec<(Option<u64>, u64)> =
            records.iter().map(|r| (r.product_id, r.variant_id)).collect();
        assert_eq!(ids, vec![(Some(3), 31), (Some(3), 32), (Some(7), 71)]);

        let chuck = &records[1];
        assert_eq!(chuck.price.as_deref(), Some("59.90"));
        assert_eq!(chuck.compare_at_price.as_deref(), Some("79.90"));
        assert_eq!(chuck.inventory_quantity, None);
        assert_eq!(chuck.options, vec!["42"]);
        assert_eq!(chuck.variant_attributes.get("color").map(String::as_str), Some("Nero"));

        let samba = &records[2];
        assert_eq!(samba.price.as_deref(), Some("120.5"));
        assert_eq!(samba.inventory_quantity, Some(0));
        assert_eq!(samba.tags, vec!["a", "b"]);
        assert!(chuck.collections.is_empty());
        assert_eq!(samba.product_attributes.get("star_rating").map(String::as_str), Some("4.5"));
        // Empty attribute columns are dropped
        assert!(!samba.variant_attributes.contains_key("color"));
        assert_eq!(samba.variant_attributes.get("gender").map(String::as_str), Some("female"));

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_error() {
        let source = SnapshotSource::new("/tmp/shopfeed_no_such_snapshot/catalog.db");
        assert!(matches!(
            source.fetch_all().await,
            Err(FetchError::Snapshot(_))
        ));
    }
}
