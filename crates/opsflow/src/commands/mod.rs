pub mod cache;
pub mod discover;
pub mod execute;
pub mod reconcile;
pub mod show;
pub mod status;
pub mod validate;
