//! Database entities for the order and payment core.

pub mod order;
pub mod order_line;
pub mod product;

pub use order::Entity as Order;
pub use order_line::Entity as OrderLine;
pub use product::Entity as Product;
