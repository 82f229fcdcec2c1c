pub mod carts;
pub mod orders;
pub mod payments;
pub mod points;
pub mod pricing;
pub mod products;
pub mod settlement;
