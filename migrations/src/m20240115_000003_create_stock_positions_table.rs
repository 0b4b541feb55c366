use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StockPositions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockPositions::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockPositions::ItemId).uuid().not_null())
                    .col(
                        ColumnDef::new(StockPositions::WarehouseId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockPositions::QuantityOnHand)
                            .decimal_len(19, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockPositions::AverageUnitCost)
                            .decimal_len(19, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(StockPositions::MinQuantity).decimal_len(19, 4))
                    .col(ColumnDef::new(StockPositions::MaxQuantity).decimal_len(19, 4))
                    .col(
                        ColumnDef::new(StockPositions::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(StockPositions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockPositions::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_positions_item")
                            .from(StockPositions::Table, StockPositions::ItemId)
                            .to(Items::Table, Items::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_positions_warehouse")
                            .from(StockPositions::Table, StockPositions::WarehouseId)
                            .to(Warehouses::Table, Warehouses::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_positions_item_warehouse")
                    .table(StockPositions::Table)
                    .col(StockPositions::ItemId)
                    .col(StockPositions::WarehouseId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockPositions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockPositions {
    Table,
    Id,
    ItemId,
    WarehouseId,
    QuantityOnHand,
    AverageUnitCost,
    MinQuantity,
    MaxQuantity,
    Version,
    CreatedAt,
    UpdatedAt,
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
