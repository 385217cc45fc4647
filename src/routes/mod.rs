//! Route definitions for the storno API

mod orders;
mod storno;

pub use orders::order_routes;
pub use storno::storno_routes;
