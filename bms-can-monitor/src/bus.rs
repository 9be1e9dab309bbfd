use std::io;
use std::time::Duration;

use bms_can_decoder::can_frame::CanFrame;
use embedded_can::{ExtendedId, Frame};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::error::MonitorError;

/// Remote transmission request sent to solicit the BMS broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRequest {
    pub id: ExtendedId,
    pub dlc: usize,
}

impl RemoteRequest {
    pub const DLC: usize = 8;

    pub fn new(id: ExtendedId) -> Self {
        Self { id, dlc: Self::DLC }
    }
}

pub trait CanBus {
    async fn send(&mut self, request: &RemoteRequest) -> io::Result<()>;

    /// Waits at most `timeout` for the next data frame, `Ok(None)` if none arrived
    async fn receive(&mut self, timeout: Duration) -> io::Result<Option<CanFrame>>;
}

pub struct SocketCanBus {
    socket: socketcan::tokio::CanSocket,
}

impl SocketCanBus {
    /// Applies `bitrate` over netlink first when given, which needs CAP_NET_ADMIN
    pub fn open(interface: &str, bitrate: Option<u32>) -> Result<Self, MonitorError> {
        if let Some(bitrate) = bitrate {
            configure_bitrate(interface, bitrate)?;
        }

        let socket =
            socketcan::tokio::CanSocket::open(interface).map_err(|source| MonitorError::Open {
                interface: interface.to_string(),
                source,
            })?;
        Ok(Self { socket })
    }
}

fn configure_bitrate(interface: &str, bitrate: u32) -> Result<(), MonitorError> {
    let configure_error = |reason: String| MonitorError::Configure {
        interface: interface.to_string(),
        reason,
    };

    let can_interface = socketcan::CanInterface::open(interface)
        .map_err(|e| configure_error(e.to_string()))?;
    can_interface
        .bring_down()
        .map_err(|e| configure_error(e.to_string()))?;
    can_interface
        .set_bitrate(bitrate, None::<u32>)
        .map_err(|e| configure_error(e.to_string()))?;
    can_interface
        .bring_up()
        .map_err(|e| configure_error(e.to_string()))?;
    info!("Set bitrate of {} to {} bit/s", interface, bitrate);
    Ok(())
}

impl CanBus for SocketCanBus {
    async fn send(&mut self, request: &RemoteRequest) -> io::Result<()> {
        let frame = socketcan::CanFrame::new_remote(request.id, request.dlc).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid remote frame length")
        })?;
        trace!("Sending CAN frame: {:?}", frame);
        self.socket.write_frame(frame).await
    }

    async fn receive(&mut self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.socket.read_frame()).await {
                Ok(frame) => frame?,
                Err(_elapsed) => return Ok(None),
            };

            if let socketcan::CanFrame::Data(frame) = frame {
                trace!(
                    "Received CAN frame: ID: {:?}, Data: {:?}",
                    frame.id(),
                    frame.data()
                );
                if let Some(frame) = CanFrame::from_encoded(frame.id(), frame.data()) {
                    return Ok(Some(frame));
                }
            } else {
                debug!("Received non-data CAN frame: {:?}", frame);
            }
        }
    }
}
