use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_orders_table::Migration),
            Box::new(m20240301_000003_create_order_lines_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::ProducerId).big_integer().not_null())
                        .col(ColumnDef::new(Products::Title).string_len(255).not_null())
                        .col(ColumnDef::new(Products::Description).text())
                        .col(ColumnDef::new(Products::Category).string_len(120))
                        .col(ColumnDef::new(Products::Region).string_len(120))
                        .col(ColumnDef::new(Products::Origin).string_len(255))
                        .col(ColumnDef::new(Products::ImpactCo2G).big_integer())
                        .col(ColumnDef::new(Products::PriceCents).big_integer().not_null())
                        .col(ColumnDef::new(Products::PromoPriceCents).big_integer())
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::Status)
                                .string_len(20)
                                .not_null()
                                .default("draft"),
                        )
                        .col(
                            ColumnDef::new(Products::IsPublished)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("ix_products_region_category")
                        .table(Products::Table)
                        .col(Products::Region)
                        .col(Products::Category)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Products {
        Table,
        Id,
        ProducerId,
        Title,
        Description,
        Category,
        Region,
        Origin,
        ImpactCo2G,
        PriceCents,
        PromoPriceCents,
        Stock,
        Status,
        IsPublished,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Orders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).big_integer().not_null())
                        .col(
                            ColumnDef::new(Orders::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Orders::Currency)
                                .string_len(3)
                                .not_null()
                                .default("EUR"),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalAmountCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalItems)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalImpactCo2G)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::PaymentReference).string_len(255))
                        .col(ColumnDef::new(Orders::PaymentProvider).string_len(50))
                        .col(ColumnDef::new(Orders::IdempotencyKey).string_len(255))
                        .col(ColumnDef::new(Orders::PlacedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Orders::Notes).text())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Retry safety for order creation hinges on this unique index.
            // Note: globally unique by key, not per user (matches existing data).
            manager
                .create_index(
                    Index::create()
                        .name("ux_orders_idempotency_key")
                        .table(Orders::Table)
                        .col(Orders::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("ix_orders_user_created")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum Orders {
        Table,
        Id,
        UserId,
        Status,
        Currency,
        TotalAmountCents,
        TotalItems,
        TotalImpactCo2G,
        PaymentReference,
        PaymentProvider,
        IdempotencyKey,
        PlacedAt,
        Notes,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_order_lines_table {
    use super::m20240301_000001_create_products_table::Products;
    use super::m20240301_000002_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_order_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLines::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderLines::OrderId).big_integer().not_null())
                        .col(ColumnDef::new(OrderLines::ProductId).big_integer())
                        .col(
                            ColumnDef::new(OrderLines::ProductTitle)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLines::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderLines::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLines::ReferencePriceCents).big_integer())
                        .col(
                            ColumnDef::new(OrderLines::SubtotalCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLines::ImpactCo2G).big_integer())
                        .col(
                            ColumnDef::new(OrderLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderLines::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_lines_order")
                                .from(OrderLines::Table, OrderLines::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_lines_product")
                                .from(OrderLines::Table, OrderLines::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("ix_order_lines_product_id")
                        .table(OrderLines::Table)
                        .col(OrderLines::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLines::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    pub enum OrderLines {
        Table,
        Id,
        OrderId,
        ProductId,
        ProductTitle,
        Quantity,
        UnitPriceCents,
        ReferencePriceCents,
        SubtotalCents,
        ImpactCo2G,
        CreatedAt,
        UpdatedAt,
    }
}
