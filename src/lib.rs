pub mod attachments;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod queries;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
