pub mod advert;
pub mod envelope;
pub mod handler;
pub mod metric;
