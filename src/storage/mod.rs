pub mod database;
pub mod models;
pub mod session_store;

pub use models::StoredSession;
pub use session_store::SessionStore;

use std::fs;
use std::path::Path;

/// Ensure data directory exists
pub fn ensure_data_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}
