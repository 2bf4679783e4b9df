pub mod client;
pub mod schema;

pub use client::{DeviceClient, ReadingSource};
pub use schema::parse_reading;
