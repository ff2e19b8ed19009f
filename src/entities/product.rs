use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Publication lifecycle of a catalog product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "published")]
    Published,
    #[sea_orm(string_value = "archived")]
    Archived,
}

/// Product entity. `stock` is the authoritative available quantity and is
/// decremented only inside the order-creation transaction.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Producer (user) that owns this listing. Users live behind the auth
    /// gateway; only the foreign-key value is stored here.
    pub producer_id: i64,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Product title must be between 1 and 255 characters"
    ))]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub category: Option<String>,
    pub region: Option<String>,
    pub origin: Option<String>,

    /// Estimated carbon impact per unit, in grams.
    pub impact_co2_g: Option<i64>,

    /// Regular price in euro cents.
    pub price_cents: i64,

    /// Optional sale override; when set this is the price actually charged.
    pub promo_price_cents: Option<i64>,

    /// Available stock. Never negative.
    pub stock: i32,

    pub status: ProductStatus,
    pub is_published: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// A product can be ordered only when it is published on both axes.
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Published && self.is_published
    }

    /// Price charged for one unit: promo price when a sale is active.
    pub fn sale_price_cents(&self) -> i64 {
        self.promo_price_cents.unwrap_or(self.price_cents)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;

        if insert {
            if let ActiveValue::NotSet = active_model.status {
                active_model.status = Set(ProductStatus::Draft);
            }
            if let ActiveValue::NotSet = active_model.is_published {
                active_model.is_published = Set(false);
            }
            active_model.created_at = Set(Utc::now());
        }
        active_model.updated_at = Set(Utc::now());

        Ok(active_model)
    }
}
