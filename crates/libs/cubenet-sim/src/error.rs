use cubenet_wire::WireError;

/// The three failure classes of the simulator.
///
/// Scenario errors come from user input (bad commands, failed assertions):
/// during the load phase they are reported and the loader moves on, during
/// the simulate phase they abort the run. Protocol errors indicate a bug in
/// the protocol implementation and always fail hard. IO errors only occur
/// on the notification stream and scenario files.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed packet: {0}")]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn scenario(message: impl Into<String>) -> Self {
        SimError::Scenario(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        SimError::Protocol(message.into())
    }
}
