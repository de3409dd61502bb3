use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted state of one rendition of one asset, keyed by `(asset_hash, quality)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "transcode_qualities")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub asset_hash: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub quality: String,
    pub status: String, // pending, running, ok, error, skipped, interrupted
    pub progress: i32,
    pub message: Option<String>,
    pub segments_done: i32,
    pub segments_total: i32,
    pub segment_ms: i64,
    pub duration_ms: i64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::asset::Entity",
        from = "Column::AssetHash",
        to = "super::asset::Column::Hash",
        on_delete = "Cascade"
    )]
    Asset,
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
