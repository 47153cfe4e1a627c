mod models;
mod retention;

pub use models::*;
pub use retention::RetentionPolicy;
