pub mod health;
pub mod reindex;
pub mod search;
