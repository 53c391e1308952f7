//! Player settings: schema types and the layered loader.

mod load;
mod schema;

pub use load::{default_config_path, resolve_config_path};
pub use schema::*;
