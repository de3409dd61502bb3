use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TranscodeQualities::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TranscodeQualities::AssetHash).string().not_null())
                    .col(ColumnDef::new(TranscodeQualities::Quality).string().not_null())
                    .col(ColumnDef::new(TranscodeQualities::Status).string().not_null())
                    .col(ColumnDef::new(TranscodeQualities::Progress).integer().not_null())
                    .col(ColumnDef::new(TranscodeQualities::Message).text())
                    .col(ColumnDef::new(TranscodeQualities::SegmentsDone).integer().not_null())
                    .col(ColumnDef::new(TranscodeQualities::SegmentsTotal).integer().not_null())
                    .col(ColumnDef::new(TranscodeQualities::SegmentMs).big_integer().not_null())
                    .col(ColumnDef::new(TranscodeQualities::DurationMs).big_integer().not_null())
                    .col(ColumnDef::new(TranscodeQualities::UpdatedAt).timestamp().not_null())
                    .primary_key(
                        Index::create()
                            .col(TranscodeQualities::AssetHash)
                            .col(TranscodeQualities::Quality),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transcode_qualities_asset_hash")
                            .from(TranscodeQualities::Table, TranscodeQualities::AssetHash)
                            .to(Assets::Table, Assets::Hash)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TranscodeQualities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TranscodeQualities {
    Table,
    AssetHash,
    Quality,
    Status,
    Progress,
    Message,
    SegmentsDone,
    SegmentsTotal,
    SegmentMs,
    DurationMs,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Assets {
    Table,
    Hash,
}
