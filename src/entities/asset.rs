use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    /// Lower-case hex SHA-256 of the assembled upload.
    #[sea_orm(primary_key, auto_increment = false)]
    pub hash: String,
    pub filename: String,
    pub title: String,
    pub description: Option<String>,
    pub size_bytes: i64,
    pub original_width: Option<i32>,
    pub original_height: Option<i32>,
    pub original_quality_label: Option<String>,
    pub thumbnail_key: Option<String>,
    pub status: AssetStatus,
    pub scheduled_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Model {
    /// `WIDTHxHEIGHT` of the uploaded file, when it could be probed.
    pub fn original_resolution(&self) -> Option<String> {
        match (self.original_width, self.original_height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

/// Publication state. Independent of transcode status.
#[derive(EnumIter, DeriveActiveEnum, Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "published")]
    Published,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transcode_quality::Entity")]
    TranscodeQuality,
}

impl Related<super::transcode_quality::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TranscodeQuality.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
