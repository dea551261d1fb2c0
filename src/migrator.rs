use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_stock_locations_table::Migration),
            Box::new(m20240101_000002_create_shipments_table::Migration),
            Box::new(m20240101_000003_create_stock_moves_table::Migration),
            Box::new(m20240101_000004_create_assign_settings_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_stock_locations_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_stock_locations_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockLocations::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockLocations::Name).string().not_null())
                        .col(ColumnDef::new(StockLocations::Kind).string().not_null())
                        .col(ColumnDef::new(StockLocations::ParentId).big_integer().null())
                        // nested-set bounds, maintained by the location owner
                        .col(ColumnDef::new(StockLocations::Left).big_integer().null())
                        .col(ColumnDef::new(StockLocations::Right).big_integer().null())
                        .col(
                            ColumnDef::new(StockLocations::StorageLocationId)
                                .big_integer()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_locations_bounds")
                        .table(StockLocations::Table)
                        .col(StockLocations::Left)
                        .col(StockLocations::Right)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockLocations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLocations {
        Table,
        Id,
        Name,
        Kind,
        ParentId,
        Left,
        Right,
        StorageLocationId,
    }
}

mod m20240101_000002_create_shipments_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_shipments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Shipments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Shipments::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Shipments::Direction).string().not_null())
                        .col(ColumnDef::new(Shipments::State).string().not_null())
                        .col(ColumnDef::new(Shipments::WarehouseId).big_integer().not_null())
                        .col(ColumnDef::new(Shipments::PlannedDate).date().null())
                        .col(
                            ColumnDef::new(Shipments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Shipments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // sweep blocks scan waiting shipments by id
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_shipments_direction_state_id")
                        .table(Shipments::Table)
                        .col(Shipments::Direction)
                        .col(Shipments::State)
                        .col(Shipments::Id)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Shipments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Shipments {
        Table,
        Id,
        Direction,
        State,
        WarehouseId,
        PlannedDate,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_stock_moves_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_stock_moves_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMoves::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMoves::Id)
                                .big_integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(StockMoves::ProductId).big_integer().not_null())
                        .col(
                            ColumnDef::new(StockMoves::Quantity)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockMoves::FromLocationId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMoves::ToLocationId).big_integer().not_null())
                        .col(ColumnDef::new(StockMoves::State).string().not_null())
                        .col(ColumnDef::new(StockMoves::ShipmentId).big_integer().null())
                        .col(ColumnDef::new(StockMoves::PlannedDate).date().null())
                        .col(ColumnDef::new(StockMoves::EffectiveDate).date().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_moves_shipment")
                                .from(StockMoves::Table, StockMoves::ShipmentId)
                                .to(Shipments::Table, Shipments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_moves_shipment_id")
                        .table(StockMoves::Table)
                        .col(StockMoves::ShipmentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_moves_product_state")
                        .table(StockMoves::Table)
                        .col(StockMoves::ProductId)
                        .col(StockMoves::State)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMoves::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMoves {
        Table,
        Id,
        ProductId,
        Quantity,
        FromLocationId,
        ToLocationId,
        State,
        ShipmentId,
        PlannedDate,
        EffectiveDate,
    }

    #[derive(DeriveIden)]
    enum Shipments {
        Table,
        Id,
    }
}

mod m20240101_000004_create_assign_settings_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_assign_settings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // single row, created on first read
            manager
                .create_table(
                    Table::create()
                        .table(AssignSettings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssignSettings::Id)
                                .integer()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(AssignSettings::TryWaitToAssign)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(AssignSettings::BlockSize).integer().null())
                        .col(ColumnDef::new(AssignSettings::RepeatBlocks).integer().null())
                        .col(
                            ColumnDef::new(AssignSettings::NextId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AssignSettings::LastId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssignSettings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AssignSettings {
        Table,
        Id,
        TryWaitToAssign,
        BlockSize,
        RepeatBlocks,
        NextId,
        LastId,
    }
}
