pub mod fields;
pub mod row;
pub mod span;

pub use fields::{FieldMap, LogicalField, TelemetryKind};
pub use row::Row;
pub use span::SpanRow;
