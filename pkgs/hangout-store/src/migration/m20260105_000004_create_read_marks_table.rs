use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum ReadMarks {
    Table,
    MessageId,
    UserId,
    ReadAt,
}

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20260105_000004_create_read_marks_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReadMarks::Table)
                    .col(ColumnDef::new(ReadMarks::MessageId).string().not_null())
                    .col(ColumnDef::new(ReadMarks::UserId).string().not_null())
                    .col(ColumnDef::new(ReadMarks::ReadAt).big_integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(ReadMarks::MessageId)
                            .col(ReadMarks::UserId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_read_marks_message")
                            .from(ReadMarks::Table, ReadMarks::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_read_marks_user")
                    .table(ReadMarks::Table)
                    .col(ReadMarks::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReadMarks::Table).to_owned())
            .await
    }
}
