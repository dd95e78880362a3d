pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod storage;
pub mod store;
pub mod sync;
pub mod task_api;

#[cfg(test)]
pub(crate) mod test_support;

pub use task_api::ReminderApp;
