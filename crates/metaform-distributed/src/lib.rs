//! Metaform Distributed - Data-Parallel Training over Sockets
//!
//! A coordinator (`DistributedTrainer`) holds one TCP connection per device.
//! Each training step splits the batch into equal contiguous chunks, ships
//! one chunk to every device, collects the per-device gradients, averages
//! them in device order and applies the result through an optimizer. Devices
//! run a `Worker` that answers each chunk with its gradients.
//!
//! # Example
//!
//! ```no_run
//! use metaform_autograd::Graph;
//! use metaform_distributed::{DistributedTrainer, TrainerConfig, Worker};
//! use metaform_matrix::Matrix;
//! use metaform_optim::Sgd;
//!
//! # async fn run() -> metaform_core::Result<()> {
//! let graph = Graph::new();
//! let w = graph.tensor(Matrix::zeros(1, 3), true);
//!
//! let rendezvous = DistributedTrainer::bind(TrainerConfig::new(1).address("127.0.0.1", 0)).await?;
//! let addr = rendezvous.local_addr()?;
//! tokio::spawn(async move {
//!     let worker = Worker::connect(addr).await?;
//!     worker.serve(|_chunk| Ok(vec![Matrix::ones(1, 3)])).await
//! });
//!
//! let mut trainer = rendezvous.accept_devices(Sgd::new(vec![w], 0.1)).await?;
//! let report = trainer.train_step(&[Matrix::ones(2, 2)]).await?;
//! assert_eq!(report.step, 1);
//! trainer.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! @version 0.1.0
//! @author Metaform Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

// =============================================================================
// Modules
// =============================================================================

pub mod config;
pub mod partition;
pub mod protocol;
pub mod reduce;
pub mod trainer;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::TrainerConfig;
pub use metaform_core::{Error, Result};
pub use partition::{partition, Partition};
pub use protocol::{Message, DEFAULT_MAX_FRAME_LEN};
pub use reduce::{average_gradients, ReduceOp};
pub use trainer::{DistributedTrainer, Rendezvous, StepReport};
pub use worker::{Worker, WorkerReport};
