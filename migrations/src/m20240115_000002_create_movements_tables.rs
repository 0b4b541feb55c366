use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Movements::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Movements::MovementType).string().not_null())
                    .col(ColumnDef::new(Movements::Subtype).string())
                    .col(
                        ColumnDef::new(Movements::MovementDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Movements::SourceWarehouseId).uuid())
                    .col(ColumnDef::new(Movements::DestinationWarehouseId).uuid())
                    .col(ColumnDef::new(Movements::ThirdParty).string())
                    .col(ColumnDef::new(Movements::ReferenceDocument).string())
                    .col(ColumnDef::new(Movements::Observation).string())
                    .col(ColumnDef::new(Movements::State).string().not_null())
                    .col(ColumnDef::new(Movements::CreatedBy).string().not_null())
                    .col(ColumnDef::new(Movements::PublishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Movements::VoidedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Movements::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Movements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Movements::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_movements_source_warehouse")
                            .from(Movements::Table, Movements::SourceWarehouseId)
                            .to(Warehouses::Table, Warehouses::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_movements_destination_warehouse")
                            .from(Movements::Table, Movements::DestinationWarehouseId)
                            .to(Warehouses::Table, Warehouses::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movements_state_date")
                    .table(Movements::Table)
                    .col(Movements::State)
                    .col(Movements::MovementDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MovementDetails::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MovementDetails::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MovementDetails::MovementId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MovementDetails::LineNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MovementDetails::ItemId).uuid().not_null())
                    .col(
                        ColumnDef::new(MovementDetails::Quantity)
                            .decimal_len(19, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MovementDetails::UnitCost).decimal_len(19, 4))
                    .col(
                        ColumnDef::new(MovementDetails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_movement_details_movement")
                            .from(MovementDetails::Table, MovementDetails::MovementId)
                            .to(Movements::Table, Movements::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_movement_details_item")
                            .from(MovementDetails::Table, MovementDetails::ItemId)
                            .to(Items::Table, Items::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movement_details_movement_line")
                    .table(MovementDetails::Table)
                    .col(MovementDetails::MovementId)
                    .col(MovementDetails::LineNumber)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movement_details_item")
                    .table(MovementDetails::Table)
                    .col(MovementDetails::ItemId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MovementDetails::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Movements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Movements {
    Table,
    Id,
    MovementType,
    Subtype,
    MovementDate,
    SourceWarehouseId,
    DestinationWarehouseId,
    ThirdParty,
    ReferenceDocument,
    Observation,
    State,
    CreatedBy,
    PublishedAt,
    VoidedAt,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MovementDetails {
    Table,
    Id,
    MovementId,
    LineNumber,
    ItemId,
    Quantity,
    UnitCost,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Warehouses {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
}
