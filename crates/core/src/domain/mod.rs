pub mod knowledge;
pub mod order;
pub mod price;
pub mod product;
pub mod user;
