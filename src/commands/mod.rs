pub mod delete;
pub mod info;
pub mod ingest;
pub mod list;
pub mod output;
pub mod search;
pub mod status;
pub mod text;
pub mod worker;
