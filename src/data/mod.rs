pub mod row;
pub mod value;

pub use row::{CellError, Row};
pub use value::Value;
