pub mod cluster;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod logging;
pub mod rss;
pub mod vector;
pub mod worker;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_CLUSTER: &str = "cluster";
