//! Worker - Device Side of a Distributed Session
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::net::SocketAddr;

use tokio::net::{TcpStream, ToSocketAddrs};

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;

use crate::protocol::{read_message, try_read_message, write_message, Message, DEFAULT_MAX_FRAME_LEN};

/// Summary of a finished worker session.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    /// Connection index assigned by the coordinator.
    pub device_index: usize,
    /// Number of batches processed.
    pub batches: usize,
    /// The last averaged gradients received, if any.
    pub latest_reduced: Option<Vec<Matrix>>,
}

/// A connected device awaiting work.
#[derive(Debug)]
pub struct Worker {
    stream: TcpStream,
    device_index: usize,
    num_devices: usize,
    max_frame_len: usize,
}

impl Worker {
    /// Connects to a coordinator and waits for the device assignment.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with(addr, DEFAULT_MAX_FRAME_LEN).await
    }

    /// Like `connect`, with an explicit frame size limit.
    pub async fn connect_with(addr: impl ToSocketAddrs, max_frame_len: usize) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        match read_message(&mut stream, max_frame_len).await? {
            Message::Assign {
                device_index,
                num_devices,
            } => {
                tracing::debug!(device_index, num_devices, "assigned by coordinator");
                Ok(Self {
                    stream,
                    device_index,
                    num_devices,
                    max_frame_len,
                })
            }
            other => Err(Error::transport(format!(
                "expected Assign from coordinator, got {}",
                other.kind()
            ))),
        }
    }

    /// Index assigned by the coordinator.
    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Devices in the session.
    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    /// Address of the coordinator.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Answers every `Batch` with `compute(chunk)` until the coordinator sends
    /// `Shutdown` or closes the connection.
    ///
    /// A `compute` error ends the session; the coordinator sees the closed
    /// connection as a transport failure.
    pub async fn serve<F>(mut self, mut compute: F) -> Result<WorkerReport>
    where
        F: FnMut(&[Matrix]) -> Result<Vec<Matrix>>,
    {
        let mut report = WorkerReport {
            device_index: self.device_index,
            batches: 0,
            latest_reduced: None,
        };

        while let Some(message) = try_read_message(&mut self.stream, self.max_frame_len).await? {
            match message {
                Message::Batch(chunk) => {
                    let grads = compute(&chunk)?;
                    write_message(&mut self.stream, &Message::Gradients(grads)).await?;
                    report.batches += 1;
                }
                Message::Reduced(grads) => report.latest_reduced = Some(grads),
                Message::Shutdown => {
                    tracing::debug!(device = self.device_index, batches = report.batches, "shutdown received");
                    return Ok(report);
                }
                other => {
                    return Err(Error::transport(format!(
                        "unexpected {} from coordinator",
                        other.kind()
                    )))
                }
            }
        }

        tracing::debug!(device = self.device_index, "coordinator closed the connection");
        Ok(report)
    }
}
