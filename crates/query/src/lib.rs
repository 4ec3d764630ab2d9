pub mod backend;
pub mod commands;
pub mod exec;
pub mod http;
pub mod plan;
pub mod schema;
pub mod template;

pub use backend::{Backend, DatasetInfo, MonitorInfo, QueryWindow};
pub use exec::{PreparedQuery, RowOrder, SortKey, execute};
pub use http::HttpBackend;
pub use schema::{Inventory, discover};
