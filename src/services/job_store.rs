use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entities::asset::Entity as Asset;
use crate::entities::transcode_quality::{self, Entity as TranscodeQuality};
use crate::error::AppResult;
use crate::models::quality::Quality;
use crate::models::status::QualityState;

/// Per-quality rows of every job, grouped by asset hash.
pub type StoredJobs = BTreeMap<String, BTreeMap<Quality, QualityState>>;

/// Durable copy of per-quality job state, one row per `(asset_hash, quality)`.
#[derive(Clone)]
pub struct JobStore {
    db: DatabaseConnection,
}

fn to_active(hash: &str, quality: Quality, state: &QualityState) -> transcode_quality::ActiveModel {
    transcode_quality::ActiveModel {
        asset_hash: Set(hash.to_string()),
        quality: Set(quality.label().to_string()),
        status: Set(state.status.as_str().to_string()),
        progress: Set(state.progress as i32),
        message: Set(state.message.clone()),
        segments_done: Set(state.segments_done as i32),
        segments_total: Set(state.segments_total as i32),
        segment_ms: Set(state.segment_ms as i64),
        duration_ms: Set(state.duration_ms as i64),
        updated_at: Set(Utc::now().naive_utc()),
    }
}

fn from_model(row: &transcode_quality::Model) -> AppResult<(Quality, QualityState)> {
    let quality: Quality = row.quality.parse()?;
    let state = QualityState {
        status: row.status.parse()?,
        progress: row.progress.clamp(0, 100) as u8,
        message: row.message.clone(),
        segments_done: row.segments_done.max(0) as u32,
        segments_total: row.segments_total.max(0) as u32,
        segment_ms: row.segment_ms.max(0) as u64,
        duration_ms: row.duration_ms.max(0) as u64,
    };
    Ok((quality, state))
}

impl JobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn save(&self, hash: &str, quality: Quality, state: &QualityState) -> AppResult<()> {
        TranscodeQuality::insert(to_active(hash, quality, state))
            .on_conflict(
                OnConflict::columns([
                    transcode_quality::Column::AssetHash,
                    transcode_quality::Column::Quality,
                ])
                .update_columns([
                    transcode_quality::Column::Status,
                    transcode_quality::Column::Progress,
                    transcode_quality::Column::Message,
                    transcode_quality::Column::SegmentsDone,
                    transcode_quality::Column::SegmentsTotal,
                    transcode_quality::Column::SegmentMs,
                    transcode_quality::Column::DurationMs,
                    transcode_quality::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    pub async fn save_all(&self, hash: &str, states: &BTreeMap<Quality, QualityState>) -> AppResult<()> {
        for (quality, state) in states {
            self.save(hash, *quality, state).await?;
        }
        Ok(())
    }

    /// Every stored job. Rows that no longer parse are logged and skipped.
    pub async fn load_all(&self) -> AppResult<StoredJobs> {
        let rows = TranscodeQuality::find()
            .order_by_asc(transcode_quality::Column::AssetHash)
            .all(&self.db)
            .await?;

        let mut jobs = StoredJobs::new();
        for row in &rows {
            match from_model(row) {
                Ok((quality, state)) => {
                    jobs.entry(row.asset_hash.clone())
                        .or_default()
                        .insert(quality, state);
                }
                Err(e) => tracing::warn!(
                    hash = %row.asset_hash,
                    quality = %row.quality,
                    "skipping unreadable job row: {}",
                    e
                ),
            }
        }
        Ok(jobs)
    }

    /// Whether the asset row a job belongs to is still registered.
    pub async fn asset_exists(&self, hash: &str) -> AppResult<bool> {
        Ok(Asset::find_by_id(hash.to_string()).one(&self.db).await?.is_some())
    }

    pub async fn delete_for_asset(&self, hash: &str) -> AppResult<u64> {
        let result = TranscodeQuality::delete_many()
            .filter(transcode_quality::Column::AssetHash.eq(hash))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
