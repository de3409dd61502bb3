use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Assets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Assets::Hash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Assets::Filename).string().not_null())
                    .col(ColumnDef::new(Assets::Title).string().not_null())
                    .col(ColumnDef::new(Assets::Description).text())
                    .col(ColumnDef::new(Assets::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Assets::OriginalWidth).integer())
                    .col(ColumnDef::new(Assets::OriginalHeight).integer())
                    .col(ColumnDef::new(Assets::OriginalQualityLabel).string())
                    .col(ColumnDef::new(Assets::ThumbnailKey).string())
                    .col(ColumnDef::new(Assets::Status).string().not_null())
                    .col(ColumnDef::new(Assets::ScheduledAt).timestamp())
                    .col(ColumnDef::new(Assets::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Assets::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_assets_status_scheduled_at")
                    .table(Assets::Table)
                    .col(Assets::Status)
                    .col(Assets::ScheduledAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Assets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Assets {
    Table,
    Hash,
    Filename,
    Title,
    Description,
    SizeBytes,
    OriginalWidth,
    OriginalHeight,
    OriginalQualityLabel,
    ThumbnailKey,
    Status,
    ScheduledAt,
    CreatedAt,
    UpdatedAt,
}
