use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only cost correction log; rows are never updated or deleted
        manager
            .create_table(
                Table::create()
                    .table(AuditEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEntries::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditEntries::UserId).string().not_null())
                    .col(ColumnDef::new(AuditEntries::MovementId).uuid())
                    .col(ColumnDef::new(AuditEntries::ItemId).uuid().not_null())
                    .col(ColumnDef::new(AuditEntries::WarehouseId).uuid().not_null())
                    .col(
                        ColumnDef::new(AuditEntries::PreviousCost)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuditEntries::NewCost)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuditEntries::PreviousQuantity)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuditEntries::NewQuantity)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AuditEntries::CostDifference)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditEntries::Reason).string().not_null())
                    .col(
                        ColumnDef::new(AuditEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_audit_entries_item")
                            .from(AuditEntries::Table, AuditEntries::ItemId)
                            .to(Items::Table, Items::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_audit_entries_warehouse")
                            .from(AuditEntries::Table, AuditEntries::WarehouseId)
                            .to(Warehouses::Table, Warehouses::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_entries_item_warehouse")
                    .table(AuditEntries::Table)
                    .col(AuditEntries::ItemId)
                    .col(AuditEntries::WarehouseId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_entries_created_at")
                    .table(AuditEntries::Table)
                    .col((AuditEntries::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditEntries {
    Table,
    Id,
    UserId,
    MovementId,
    ItemId,
    WarehouseId,
    PreviousCost,
    NewCost,
    PreviousQuantity,
    NewQuantity,
    CostDifference,
    Reason,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Warehouses {
    Table,
    Id,
}
