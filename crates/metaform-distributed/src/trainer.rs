//! Trainer - Data-Parallel Coordinator
//!
//! The coordinator owns one connection per device. A training step fans the
//! batch out with one task per connection, so slow devices do not serialize
//! the receive loop, then gathers the replies by device index before
//! reducing. Each connection is moved into its task for the duration of the
//! exchange and handed back afterwards, so no two tasks ever touch the same
//! socket and only the coordinator writes parameters.
//!
//! A failed exchange leaves the remaining devices at unknown positions in
//! the protocol, so the session is marked broken and refuses further steps.
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use metaform_core::{Error, Result};
use metaform_matrix::Matrix;
use metaform_optim::Optimizer;

use crate::config::TrainerConfig;
use crate::partition::partition;
use crate::protocol::{read_message, write_message, Message};
use crate::reduce::average_gradients;

/// Awaits `fut`, failing with `TransportTimeout` once `limit` elapses.
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::timeout(operation, limit))?,
        None => fut.await,
    }
}

// =============================================================================
// Rendezvous
// =============================================================================

/// A bound coordinator endpoint waiting for its devices.
#[derive(Debug)]
pub struct Rendezvous {
    listener: TcpListener,
    config: TrainerConfig,
}

impl Rendezvous {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts exactly `num_devices` connections, in arrival order, and
    /// assigns each its connection index.
    pub async fn accept_devices<O: Optimizer>(self, optimizer: O) -> Result<DistributedTrainer<O>> {
        let Rendezvous { listener, config } = self;
        let num_devices = config.num_devices;

        let accept_all = async {
            let mut links = Vec::with_capacity(num_devices);
            for index in 0..num_devices {
                let (mut stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                write_message(
                    &mut stream,
                    &Message::Assign {
                        device_index: index,
                        num_devices,
                    },
                )
                .await?;
                tracing::info!(device = index, %peer, "device connected");
                links.push(DeviceLink {
                    index,
                    peer,
                    stream,
                });
            }
            Ok::<_, Error>(links)
        };
        let links = with_timeout("device rendezvous", config.accept_timeout, accept_all).await?;

        tracing::info!(num_devices, "all devices connected");
        Ok(DistributedTrainer {
            config,
            links,
            optimizer,
            steps: 0,
            broken: false,
        })
    }
}

// =============================================================================
// Distributed Trainer
// =============================================================================

#[derive(Debug)]
struct DeviceLink {
    index: usize,
    peer: SocketAddr,
    stream: TcpStream,
}

/// Outcome of one synchronous training round.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// 1-based step counter.
    pub step: u64,
    /// Items sent to each device.
    pub chunk_size: usize,
    /// Items of the batch that were not sent to any device.
    pub dropped: usize,
    /// The averaged gradients applied to the parameters.
    pub gradients: Vec<Matrix>,
}

/// Coordinator of a data-parallel session.
pub struct DistributedTrainer<O> {
    config: TrainerConfig,
    links: Vec<DeviceLink>,
    optimizer: O,
    steps: u64,
    broken: bool,
}

impl DistributedTrainer<()> {
    /// Validates `config` and binds the coordinator endpoint. The optimizer
    /// is supplied later, to `Rendezvous::accept_devices`.
    pub async fn bind(config: TrainerConfig) -> Result<Rendezvous> {
        config.validate()?;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        tracing::debug!(addr = %listener.local_addr()?, "coordinator listening");
        Ok(Rendezvous { listener, config })
    }
}

impl<O: Optimizer> DistributedTrainer<O> {
    /// Binds and waits for every device to connect.
    pub async fn new(config: TrainerConfig, optimizer: O) -> Result<Self> {
        DistributedTrainer::<()>::bind(config)
            .await?
            .accept_devices(optimizer)
            .await
    }

    /// Number of connected devices.
    pub fn num_devices(&self) -> usize {
        self.links.len()
    }

    /// Completed steps.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Session settings.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// The wrapped optimizer.
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Mutable access to the wrapped optimizer.
    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    /// Returns true once a transport failure has ended the session.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(Error::state(
                "distributed session is broken by an earlier transport failure",
            ));
        }
        Ok(())
    }

    /// Runs one synchronous round: partition, exchange, reduce, broadcast,
    /// then step the optimizer with the averaged gradients.
    pub async fn train_step(&mut self, batch: &[Matrix]) -> Result<StepReport> {
        self.ensure_usable()?;
        let parts = partition(batch, self.links.len())?;
        let chunk_size = parts.chunk_size();

        let per_device = self.exchange(parts.chunks).await?;
        let gradients = average_gradients(&per_device)?;

        let params = self.optimizer.parameters();
        if gradients.len() != params.len() {
            return Err(Error::shape(format!(
                "devices reported {} gradients for {} parameters",
                gradients.len(),
                params.len()
            )));
        }

        self.broadcast(&gradients).await?;

        for (param, grad) in self.optimizer.parameters().iter().zip(&gradients) {
            param.set_grad(grad.clone())?;
        }
        self.optimizer.step()?;
        self.steps += 1;

        tracing::debug!(step = self.steps, chunk_size, dropped = parts.dropped, "training step complete");
        Ok(StepReport {
            step: self.steps,
            chunk_size,
            dropped: parts.dropped,
            gradients,
        })
    }

    /// Sends every device its chunk and collects the replies in device order.
    async fn exchange(&mut self, chunks: Vec<Vec<Matrix>>) -> Result<Vec<Vec<Matrix>>> {
        let limit = self.config.response_timeout;
        let max_frame_len = self.config.max_frame_len;

        let links = std::mem::take(&mut self.links);
        let handles: Vec<_> = links
            .into_iter()
            .zip(chunks)
            .map(|(mut link, chunk)| {
                tokio::spawn(async move {
                    let operation = format!("gradients from device {}", link.index);
                    let result = with_timeout(&operation, limit, async {
                        write_message(&mut link.stream, &Message::Batch(chunk)).await?;
                        match read_message(&mut link.stream, max_frame_len).await? {
                            Message::Gradients(grads) => Ok(grads),
                            other => Err(Error::transport(format!(
                                "device {} sent {} where Gradients was expected",
                                link.index,
                                other.kind()
                            ))),
                        }
                    })
                    .await;
                    (link, result)
                })
            })
            .collect();

        let mut per_device = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok((link, result)) => {
                    match result {
                        Ok(grads) => per_device.push(grads),
                        Err(err) => {
                            tracing::error!(device = link.index, peer = %link.peer, error = %err, "device exchange failed");
                            first_error.get_or_insert(err);
                        }
                    }
                    self.links.push(link);
                }
                Err(join) => {
                    first_error.get_or_insert(Error::transport(format!("device task failed: {join}")));
                }
            }
        }

        if let Some(err) = first_error {
            self.broken = true;
            return Err(err);
        }
        Ok(per_device)
    }

    /// Sends the averaged gradients to every device.
    pub async fn broadcast(&mut self, gradients: &[Matrix]) -> Result<()> {
        self.ensure_usable()?;
        let message = Message::Reduced(gradients.to_vec());
        for link in &mut self.links {
            if let Err(err) = write_message(&mut link.stream, &message).await {
                self.broken = true;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Tells every device the session is over and closes the connections.
    pub async fn shutdown(mut self) -> Result<O> {
        if !self.broken {
            for link in &mut self.links {
                write_message(&mut link.stream, &Message::Shutdown).await?;
            }
        }
        tracing::info!(steps = self.steps, "distributed session closed");
        Ok(self.optimizer)
    }
}

impl<O: Optimizer> std::fmt::Debug for DistributedTrainer<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTrainer")
            .field("num_devices", &self.links.len())
            .field("steps", &self.steps)
            .field("broken", &self.broken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let err = with_timeout("sleep", Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, Error::timeout("sleep", Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_with_timeout_unbounded() {
        let value = with_timeout("ready", None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let rendezvous = DistributedTrainer::bind(TrainerConfig::new(2).address("127.0.0.1", 0))
            .await
            .unwrap();
        assert_ne!(rendezvous.local_addr().unwrap().port(), 0);
    }
}
