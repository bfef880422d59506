//! Distributed Tests - Coordinator and Workers over Loopback
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use metaform_autograd::{Graph, Tensor};
use metaform_distributed::protocol::{read_message, write_message};
use metaform_distributed::{
    DistributedTrainer, Error, Message, Result, TrainerConfig, Worker, WorkerReport,
    DEFAULT_MAX_FRAME_LEN,
};
use metaform_matrix::Matrix;
use metaform_optim::{Optimizer, Sgd};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("metaform_distributed=debug")
        .with_test_writer()
        .try_init();
}

fn row(values: &[f64]) -> Matrix {
    Matrix::from_rows(vec![values.to_vec()]).unwrap()
}

fn local_config(num_devices: usize) -> TrainerConfig {
    TrainerConfig::new(num_devices)
        .address("127.0.0.1", 0)
        .accept_timeout(Some(Duration::from_secs(10)))
        .response_timeout(Some(Duration::from_secs(10)))
}

fn spawn_workers<F>(addr: SocketAddr, count: usize, compute: F) -> Vec<JoinHandle<Result<WorkerReport>>>
where
    F: Fn(usize, &[Matrix]) -> Result<Vec<Matrix>> + Clone + Send + 'static,
{
    (0..count)
        .map(|_| {
            let compute = compute.clone();
            tokio::spawn(async move {
                let worker = Worker::connect(addr).await?;
                let index = worker.device_index();
                worker.serve(move |chunk| compute(index, chunk)).await
            })
        })
        .collect()
}

fn parameter(cols: usize) -> Tensor {
    Graph::new().tensor(Matrix::zeros(1, cols), true)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_devices_average_and_step() {
    init_tracing();
    let rendezvous = DistributedTrainer::bind(local_config(3)).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    let workers = spawn_workers(addr, 3, |index, _chunk| {
        let base = 1.0 + 2.0 * index as f64;
        Ok(vec![row(&[base, base + 1.0, base + 2.0])])
    });

    let param = parameter(3);
    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![param.clone()], 1.0))
        .await
        .unwrap();
    assert_eq!(trainer.num_devices(), 3);

    let batch: Vec<Matrix> = (0..6).map(|i| Matrix::filled(1, 1, 1, f64::from(i))).collect();
    let report = trainer.train_step(&batch).await.unwrap();
    assert_eq!(report.step, 1);
    assert_eq!(report.chunk_size, 2);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.gradients, vec![row(&[3.0, 4.0, 5.0])]);
    assert_eq!(param.value().unwrap(), row(&[-3.0, -4.0, -5.0]));
    assert_eq!(trainer.optimizer().parameters().len(), 1);

    trainer.shutdown().await.unwrap();
    for handle in workers {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.latest_reduced, Some(vec![row(&[3.0, 4.0, 5.0])]));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_uneven_batch_drops_remainder() {
    init_tracing();
    let rendezvous = DistributedTrainer::bind(local_config(3)).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    let workers = spawn_workers(addr, 3, |_index, chunk| {
        Ok(vec![Matrix::filled(1, 1, 1, chunk.len() as f64)])
    });

    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 0.1))
        .await
        .unwrap();

    let batch: Vec<Matrix> = (0..10).map(|_| Matrix::ones(1, 1)).collect();
    let report = trainer.train_step(&batch).await.unwrap();
    assert_eq!(report.chunk_size, 3);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.gradients, vec![Matrix::filled(1, 1, 1, 3.0)]);

    trainer.shutdown().await.unwrap();
    for handle in workers {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reduction_follows_device_order_not_arrival() {
    init_tracing();
    let rendezvous = DistributedTrainer::bind(local_config(3)).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    // device 2 answers first and device 1 last; summing in that order gives 1/3
    let workers = spawn_workers(addr, 3, |index, _chunk| {
        let (value, delay_ms) = match index {
            0 => (1e16, 50),
            1 => (1.0, 100),
            _ => (-1e16, 0),
        };
        std::thread::sleep(Duration::from_millis(delay_ms));
        Ok(vec![Matrix::filled(1, 1, 1, value)])
    });

    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 1.0))
        .await
        .unwrap();

    for _ in 0..3 {
        let batch = vec![Matrix::ones(1, 1); 3];
        let report = trainer.train_step(&batch).await.unwrap();
        assert_eq!(report.gradients[0].data(), &[0.0]);
    }
    assert_eq!(trainer.steps(), 3);

    trainer.shutdown().await.unwrap();
    for handle in workers {
        assert_eq!(handle.await.unwrap().unwrap().batches, 3);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_device_times_out_and_breaks_session() {
    init_tracing();
    let config = local_config(1).response_timeout(Some(Duration::from_millis(50)));
    let rendezvous = DistributedTrainer::bind(config).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    let _workers = spawn_workers(addr, 1, |_index, _chunk| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(vec![Matrix::zeros(1, 1)])
    });

    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 1.0))
        .await
        .unwrap();

    let err = trainer.train_step(&[Matrix::ones(1, 1)]).await.unwrap_err();
    assert!(matches!(err, Error::TransportTimeout { .. }));
    assert!(err.is_transport());
    assert!(trainer.is_broken());

    let err = trainer.train_step(&[Matrix::ones(1, 1)]).await.unwrap_err();
    assert!(err.is_state());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accept_times_out_without_enough_devices() {
    init_tracing();
    let config = local_config(2).accept_timeout(Some(Duration::from_millis(100)));
    let rendezvous = DistributedTrainer::bind(config).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    let _workers = spawn_workers(addr, 1, |_index, _chunk| Ok(Vec::new()));

    let err = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportTimeout { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unexpected_reply_is_transport_error() {
    init_tracing();
    let rendezvous = DistributedTrainer::bind(local_config(1)).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();

    let rogue = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await?;
        let assign = read_message(&mut stream, DEFAULT_MAX_FRAME_LEN).await?;
        assert_eq!(assign, Message::Assign { device_index: 0, num_devices: 1 });
        let _batch = read_message(&mut stream, DEFAULT_MAX_FRAME_LEN).await?;
        write_message(&mut stream, &Message::Shutdown).await?;
        Ok::<_, Error>(())
    });

    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 1.0))
        .await
        .unwrap();
    let err = trainer.train_step(&[Matrix::ones(1, 1)]).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    rogue.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_gradient_count_must_match_parameters() {
    init_tracing();
    let rendezvous = DistributedTrainer::bind(local_config(1)).await.unwrap();
    let addr = rendezvous.local_addr().unwrap();
    let _workers = spawn_workers(addr, 1, |_index, _chunk| {
        Ok(vec![Matrix::zeros(1, 1), Matrix::zeros(1, 1)])
    });

    let mut trainer = rendezvous
        .accept_devices(Sgd::new(vec![parameter(1)], 1.0))
        .await
        .unwrap();
    let err = trainer.train_step(&[Matrix::ones(1, 1)]).await.unwrap_err();
    assert!(err.is_shape());
    assert!(!trainer.is_broken());
}

#[tokio::test]
async fn test_zero_devices_rejected_before_binding() {
    let err = DistributedTrainer::bind(TrainerConfig::new(0)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}
