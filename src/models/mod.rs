pub mod connections;
pub mod plan;
pub mod schema;
pub mod value;
