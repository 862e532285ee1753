pub mod context;
pub mod corr;
pub mod error;

pub use context::AppContext;
pub use corr::{child_corr_id, new_corr_id};
pub use error::{GleanerError, Result};
