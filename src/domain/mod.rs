pub mod categories;
pub mod matcher;

pub use categories::{categorize, Category};
pub use matcher::{extract_domain, is_whitelisted, normalize_domain, pattern_matches};
