use thiserror::Error;

/// Setup failures; anything after the bus is open is logged and absorbed
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unable to open CAN interface '{interface}': {source}")]
    Open {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to configure CAN interface '{interface}': {reason}")]
    Configure { interface: String, reason: String },
    #[error("request id {0:#X} does not fit into a 29 bit identifier")]
    InvalidRequestId(u32),
}
