pub mod cluster;
pub mod model;

pub use cluster::{ClusterCommands, handle_cluster_command};
pub use model::{DeployArgs, ListArgs, OutputFormat};
