use std::path::Path;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::asset::{self, AssetStatus, Entity as Asset};
use crate::error::{AppError, AppResult};
use crate::models::quality::original_quality_label;
use crate::pagination::PaginatedResponse;
use crate::services::encoder::SourceInfo;

/// Input for [`AssetRegistry::register`].
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub hash: String,
    pub filename: String,
    pub size_bytes: u64,
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Asset metadata keyed by content hash.
#[derive(Clone)]
pub struct AssetRegistry {
    db: DatabaseConnection,
}

fn title_from_filename(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(filename)
        .to_string()
}

impl AssetRegistry {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Registers a finished upload. Re-registering a known hash returns the
    /// existing record untouched.
    pub async fn register(&self, new: NewAsset) -> AppResult<asset::Model> {
        if let Some(existing) = Asset::find_by_id(new.hash.clone()).one(&self.db).await? {
            tracing::debug!(hash = %new.hash, "asset already registered");
            return Ok(existing);
        }

        let now = Utc::now().naive_utc();
        let source = new.source;
        let model = asset::ActiveModel {
            hash: Set(new.hash.clone()),
            title: Set(title_from_filename(&new.filename)),
            filename: Set(new.filename),
            description: Set(None),
            size_bytes: Set(new.size_bytes as i64),
            original_width: Set(source.map(|s| s.width as i32)),
            original_height: Set(source.map(|s| s.height as i32)),
            original_quality_label: Set(source.map(|s| original_quality_label(s.height))),
            thumbnail_key: Set(None),
            status: Set(AssetStatus::Draft),
            scheduled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&self.db).await {
            Ok(saved) => Ok(saved),
            // A concurrent register of the same bytes won the insert.
            Err(e) => match Asset::find_by_id(new.hash).one(&self.db).await? {
                Some(existing) => Ok(existing),
                None => Err(e.into()),
            },
        }
    }

    pub async fn find(&self, hash: &str) -> AppResult<Option<asset::Model>> {
        Ok(Asset::find_by_id(hash.to_string()).one(&self.db).await?)
    }

    pub async fn get(&self, hash: &str) -> AppResult<asset::Model> {
        self.find(hash)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {} not found", hash)))
    }

    /// Newest first.
    pub async fn list(&self, page: u64, limit: u64) -> AppResult<PaginatedResponse<asset::Model>> {
        let paginator = Asset::find()
            .order_by_desc(asset::Column::CreatedAt)
            .order_by_asc(asset::Column::Hash)
            .paginate(&self.db, limit);
        let total_items = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok(PaginatedResponse::new(data, total_items, page, limit))
    }

    pub async fn update_metadata(&self, hash: &str, update: MetadataUpdate) -> AppResult<asset::Model> {
        let existing = self.get(hash).await?;
        let mut active: asset::ActiveModel = existing.into();

        if let Some(title) = update.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::InvalidArgument("title must not be empty".to_string()));
            }
            active.title = Set(title);
        }
        if let Some(description) = update.description {
            let description = description.trim().to_string();
            active.description = Set((!description.is_empty()).then_some(description));
        }
        active.updated_at = Set(Utc::now().naive_utc());
        Ok(active.update(&self.db).await?)
    }

    async fn set_status(
        &self,
        hash: &str,
        status: AssetStatus,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<asset::Model> {
        let existing = self.get(hash).await?;
        let mut active: asset::ActiveModel = existing.into();
        active.status = Set(status);
        active.scheduled_at = Set(scheduled_at.map(|at| at.naive_utc()));
        active.updated_at = Set(Utc::now().naive_utc());
        let saved = active.update(&self.db).await?;
        tracing::info!(hash = %hash, status = ?status, "asset status changed");
        Ok(saved)
    }

    pub async fn publish(&self, hash: &str) -> AppResult<asset::Model> {
        self.set_status(hash, AssetStatus::Published, None).await
    }

    pub async fn unpublish(&self, hash: &str) -> AppResult<asset::Model> {
        self.set_status(hash, AssetStatus::Draft, None).await
    }

    pub async fn schedule(&self, hash: &str, at: DateTime<Utc>) -> AppResult<asset::Model> {
        if at <= Utc::now() {
            return Err(AppError::InvalidArgument(
                "scheduled_at must be in the future".to_string(),
            ));
        }
        self.set_status(hash, AssetStatus::Scheduled, Some(at)).await
    }

    /// Publishes every scheduled asset whose time is at or before `now`.
    pub async fn publish_due(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let now = now.naive_utc();
        let result = Asset::update_many()
            .col_expr(asset::Column::Status, Expr::value(AssetStatus::Published.to_value()))
            .col_expr(asset::Column::ScheduledAt, Expr::value(Option::<chrono::NaiveDateTime>::None))
            .col_expr(asset::Column::UpdatedAt, Expr::value(now))
            .filter(asset::Column::Status.eq(AssetStatus::Scheduled))
            .filter(asset::Column::ScheduledAt.lte(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn set_thumbnail(&self, hash: &str, key: &str) -> AppResult<asset::Model> {
        let existing = self.get(hash).await?;
        let mut active: asset::ActiveModel = existing.into();
        active.thumbnail_key = Set(Some(key.to_string()));
        active.updated_at = Set(Utc::now().naive_utc());
        Ok(active.update(&self.db).await?)
    }

    /// Removes the asset row. Returns `false` if there was none.
    pub async fn delete(&self, hash: &str) -> AppResult<bool> {
        let result = Asset::delete_by_id(hash.to_string()).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }
}
