pub mod artifact_store;
pub mod catalog;
pub mod dedup_fs;
pub mod http_client;
pub mod parser_process;
pub mod radar;
