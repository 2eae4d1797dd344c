mod store;

pub use store::{JsonStore, RCTL_DIR};
