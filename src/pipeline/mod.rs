pub mod context;
pub mod model;
pub mod rules;
pub mod schema;
pub mod validate;
pub mod variables;
