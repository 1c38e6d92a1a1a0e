pub mod aggregate;
pub mod baseline;
pub mod cache;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod likert;
pub mod milestone;
pub mod models;
pub mod month;
pub mod orgs;
pub mod report;
pub mod scatter;
pub mod session;
pub mod source;
pub mod views;

pub use baseline::baseline;
pub use convert::normalize_date;
pub use likert::map_likert_value;
pub use milestone::evaluate_goal;
