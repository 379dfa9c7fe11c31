pub mod app;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod extract;
pub mod materialize;
pub mod mets;
pub mod output;
pub mod report;
pub mod sql;
pub mod staging;
pub mod storage_service;
pub mod store;
