pub use sea_orm_migration::prelude::*;

mod m20240115_000001_create_catalog_tables;
mod m20240115_000002_create_movements_tables;
mod m20240115_000003_create_stock_positions_table;
mod m20240115_000004_create_audit_entries_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240115_000001_create_catalog_tables::Migration),
            Box::new(m20240115_000002_create_movements_tables::Migration),
            Box::new(m20240115_000003_create_stock_positions_table::Migration),
            Box::new(m20240115_000004_create_audit_entries_table::Migration),
        ]
    }
}
