use std::collections::{BTreeMap, BTreeSet};

use sqlx::{PgPool, Pool, Postgres, Transaction};
use uuid::Uuid;

use gator_core::error::AppError;
use gator_core::models::{SaveOutcome, ScrapedProduct, ScrapedVariant};
use gator_core::traits::ProductStore;

/// Product persistence in PostgreSQL.
///
/// A product is identified by `(source_type, source_id, reseller_id)`. Saving
/// upserts the product row and replaces its variants, images and tags in one
/// transaction.
#[derive(Clone)]
pub struct ProductRepository {
    pool: Pool<Postgres>,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a stored product with its variants, images and tags.
    pub async fn find(
        &self,
        source_type: &str,
        source_id: &str,
        reseller_id: &str,
    ) -> Result<Option<ScrapedProduct>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, source_type, source_id, name, description, handle, url, brand,
                   category, metadata
            FROM products
            WHERE source_type = $1 AND source_id = $2 AND reseller_id = $3
            "#,
        )
        .bind(source_type)
        .bind(source_id)
        .bind(reseller_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let variants = sqlx::query_as::<_, VariantRow>(
            r#"
            SELECT name, sku, price, currency, available, url, images, options, source_id
            FROM product_variants
            WHERE product_id = $1
            ORDER BY position
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let images: Vec<(String,)> = sqlx::query_as(
            r#"SELECT url FROM product_images WHERE product_id = $1 ORDER BY position"#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let tags: Vec<(String,)> =
            sqlx::query_as(r#"SELECT tag FROM product_tags WHERE product_id = $1"#)
                .bind(row.id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        let mut product = row.into_product()?;
        product.variants = variants
            .into_iter()
            .map(VariantRow::into_variant)
            .collect::<Result<_, _>>()?;
        product.images = images.into_iter().map(|(url,)| url).collect();
        product.tags = tags.into_iter().map(|(tag,)| tag).collect::<BTreeSet<_>>();
        Ok(Some(product))
    }

    pub async fn count_for_reseller(&self, reseller_id: &str) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM products WHERE reseller_id = $1"#)
                .bind(reseller_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(count)
    }

    async fn replace_children(
        tx: &mut Transaction<'_, Postgres>,
        product_id: Uuid,
        product: &ScrapedProduct,
    ) -> Result<(), AppError> {
        for statement in [
            "DELETE FROM product_variants WHERE product_id = $1",
            "DELETE FROM product_images WHERE product_id = $1",
            "DELETE FROM product_tags WHERE product_id = $1",
        ] {
            sqlx::query(statement)
                .bind(product_id)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }

        for (position, variant) in product.variants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO product_variants (product_id, position, name, sku, price, currency,
                                              available, url, images, options, source_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(product_id)
            .bind(position as i32)
            .bind(&variant.name)
            .bind(&variant.sku)
            .bind(variant.price)
            .bind(&variant.currency)
            .bind(variant.available)
            .bind(&variant.url)
            .bind(serde_json::to_value(&variant.images)?)
            .bind(serde_json::to_value(&variant.options)?)
            .bind(&variant.source_id)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        for (position, url) in product.images.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO product_images (product_id, position, url) VALUES ($1, $2, $3)"#,
            )
            .bind(product_id)
            .bind(position as i32)
            .bind(url)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        for tag in &product.tags {
            sqlx::query(r#"INSERT INTO product_tags (product_id, tag) VALUES ($1, $2)"#)
                .bind(product_id)
                .bind(tag)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }
}

impl ProductStore for ProductRepository {
    async fn save(
        &self,
        reseller_id: &str,
        product: &ScrapedProduct,
    ) -> Result<SaveOutcome, AppError> {
        if product.source_id.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "product '{}' has no source id",
                product.name
            )));
        }
        if reseller_id.trim().is_empty() {
            return Err(AppError::ValidationError("reseller_id is required".into()));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // xmax is 0 only for a row this statement inserted.
        let (product_id, inserted): (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO products (reseller_id, source_type, source_id, name, description,
                                  handle, url, brand, category, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source_type, source_id, reseller_id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                handle = EXCLUDED.handle,
                url = EXCLUDED.url,
                brand = EXCLUDED.brand,
                category = EXCLUDED.category,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(reseller_id)
        .bind(&product.source_type)
        .bind(&product.source_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.handle)
        .bind(&product.url)
        .bind(&product.brand)
        .bind(&product.category)
        .bind(serde_json::to_value(&product.metadata)?)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        Self::replace_children(&mut tx, product_id, product).await?;
        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            reseller_id,
            source_id = %product.source_id,
            variants = product.variants.len(),
            inserted,
            "Saved product"
        );

        Ok(if inserted {
            SaveOutcome::Created
        } else {
            SaveOutcome::Updated
        })
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    source_type: String,
    source_id: String,
    name: String,
    description: String,
    handle: String,
    url: String,
    brand: String,
    category: String,
    metadata: serde_json::Value,
}

impl ProductRow {
    fn into_product(self) -> Result<ScrapedProduct, AppError> {
        let metadata: BTreeMap<String, String> = serde_json::from_value(self.metadata)?;
        Ok(ScrapedProduct {
            name: self.name,
            description: self.description,
            handle: self.handle,
            url: self.url,
            brand: self.brand,
            category: self.category,
            source_type: self.source_type,
            source_id: self.source_id,
            metadata,
            ..Default::default()
        })
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    name: String,
    sku: String,
    price: f64,
    currency: String,
    available: bool,
    url: String,
    images: serde_json::Value,
    options: serde_json::Value,
    source_id: String,
}

impl VariantRow {
    fn into_variant(self) -> Result<ScrapedVariant, AppError> {
        Ok(ScrapedVariant {
            name: self.name,
            sku: self.sku,
            price: self.price,
            currency: self.currency,
            available: self.available,
            url: self.url,
            images: serde_json::from_value(self.images)?,
            options: serde_json::from_value(self.options)?,
            source_id: self.source_id,
        })
    }
}
