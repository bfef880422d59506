//! Partition - Splitting a Batch Across Devices
//!
//! @version 0.1.0
//! @author Metaform Development Team

use metaform_core::{Error, Result};

/// A batch split into one contiguous chunk per device.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    /// One chunk per device, in device order.
    pub chunks: Vec<Vec<T>>,
    /// Items left over after equal division, which are not sent anywhere.
    pub dropped: usize,
}

impl<T> Partition<T> {
    /// Size of every chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunks.first().map_or(0, Vec::len)
    }
}

/// Splits `batch` into `num_devices` contiguous chunks of
/// `batch.len() / num_devices` items each.
///
/// The remainder of the division is dropped (logged at `warn`), so every
/// device always receives the same number of items.
pub fn partition<T: Clone>(batch: &[T], num_devices: usize) -> Result<Partition<T>> {
    if num_devices == 0 {
        return Err(Error::invalid_argument("cannot partition across zero devices"));
    }
    let chunk_size = batch.len() / num_devices;
    let dropped = batch.len() - chunk_size * num_devices;
    if dropped > 0 {
        tracing::warn!(
            batch = batch.len(),
            num_devices,
            dropped,
            "batch does not divide evenly across devices, dropping remainder"
        );
    }

    let chunks = (0..num_devices)
        .map(|i| batch[i * chunk_size..(i + 1) * chunk_size].to_vec())
        .collect();
    Ok(Partition { chunks, dropped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remainder_is_dropped() {
        let batch: Vec<usize> = (0..10).collect();
        let parts = partition(&batch, 3).unwrap();
        assert_eq!(parts.chunks, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);
        assert_eq!(parts.dropped, 1);
        assert_eq!(parts.chunk_size(), 3);
    }

    #[test]
    fn test_even_split() {
        let parts = partition(&[1, 2, 3, 4], 2).unwrap();
        assert_eq!(parts.chunks, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(parts.dropped, 0);
    }

    #[test]
    fn test_fewer_items_than_devices() {
        let parts = partition(&[1, 2], 3).unwrap();
        assert!(parts.chunks.iter().all(Vec::is_empty));
        assert_eq!(parts.chunks.len(), 3);
        assert_eq!(parts.dropped, 2);
    }

    #[test]
    fn test_zero_devices_rejected() {
        assert!(partition(&[1], 0).is_err());
    }
}
