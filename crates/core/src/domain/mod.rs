pub mod client;
pub mod principal;
pub mod product;
pub mod quotation;
