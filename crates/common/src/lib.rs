//! Types shared by every layer of the stock ledger.
//!
//! - Typed identifiers for products, batches, orders and movements
//! - [`Money`] stored as integer cents
//! - [`OrderStatus`], the only mutable order field that affects stock math

mod ids;
mod money;
mod status;

pub use ids::{ActorId, BatchId, MovementId, OrderId, ProductId};
pub use money::Money;
pub use status::{OrderStatus, ParseStatusError};
