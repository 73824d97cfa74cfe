mod open;
mod models;
mod insert;
mod query;
pub mod schema;

pub use open::{DestinationInventory, SourceInventory};
pub use models::*;
pub use query::InventoryRead;
