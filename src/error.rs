use thiserror::Error;

/// Failures that can occur while assembling a [`crate::simulator::Simulator`]
/// from a [`crate::simulator::SimulationBuilder`].
///
/// These are structural configuration problems, not runtime protocol errors -
/// they are always detected before the first tick runs.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no topology was provided (call from_adjacency_list before build)")]
    MissingTopology,

    #[error("no default running firmware was provided")]
    MissingDefaultFirmware,

    #[error("adjacency list references unknown node {0}")]
    UnknownNode(crate::message::DeviceId),

    #[error("node {0} lists itself as its own neighbor")]
    SelfLoop(crate::message::DeviceId),
}
