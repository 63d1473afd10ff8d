//! AigentZ: a conversational assistant over a marketing-campaign collection.
//!
//! Each utterance is classified, then either answered directly or turned into
//! a campaign filter whose results are summarized by the model. Shared by the
//! MCP server and the CLI.

pub mod backend;
pub mod campaign;
pub mod config;
pub mod direct;
pub mod error;
pub mod insight;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod session;

use std::path::PathBuf;

/// Default MongoDB connection string.
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017/";

/// Database holding the campaign collection.
pub const DEFAULT_DB_NAME: &str = "ecommerce";

/// Collection name for campaign records.
pub const DEFAULT_COLLECTION: &str = "campaigns";

pub const MIN_RESULT_LIMIT: usize = 1;
pub const MAX_RESULT_LIMIT: usize = 100;
pub const DEFAULT_RESULT_LIMIT: usize = 5;

/// Bound a caller-supplied result cap to `1..=100`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_RESULT_LIMIT, MAX_RESULT_LIMIT)
}

/// Resolve the CLI line-editor history file from env var or default location.
pub fn resolve_history_path() -> PathBuf {
    if let Ok(path) = std::env::var("AIGENTZ_HISTORY_FILE") {
        return PathBuf::from(path);
    }

    let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("aigentz").join("cli_history.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit_bounds() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(1), 1);
        assert_eq!(clamp_limit(42), 42);
        assert_eq!(clamp_limit(100), 100);
        assert_eq!(clamp_limit(101), 100);
    }
}
