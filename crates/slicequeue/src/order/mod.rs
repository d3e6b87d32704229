pub mod error;
pub mod service;
pub mod status;

pub use crate::db::order_repo::ShippingDetails;
pub use error::OrderError;
pub use service::{NewOrder, OrderService, OrderSummary, PlacedOrder, Upload};
pub use status::OrderStatus;
