pub mod agents;
pub mod scene;
