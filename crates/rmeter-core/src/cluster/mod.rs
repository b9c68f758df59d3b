pub mod controller;
pub mod node_service;
pub mod wire;

pub use controller::{ClusterController, ClusterTickMetrics};
pub use node_service::NodeService;
