pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    build_target_url, exit_code_for, load_candidates, parse_log_level, validate_hostname,
};
