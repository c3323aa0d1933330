pub mod build;
pub mod dedup;
pub mod export;
pub mod info;
