pub mod client;
pub mod dialect;
pub mod memory;
pub mod row_mapper;
pub mod sql_utils;
