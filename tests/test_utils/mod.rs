pub mod fixtures;

pub use fixtures::{StreamRig, published_messages, rig, wait_for};
