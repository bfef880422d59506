//! Configuration - Distributed Trainer Settings
//!
//! @version 0.1.0
//! @author Metaform Development Team

use std::time::Duration;

use serde::{Deserialize, Serialize};

use metaform_core::{Error, Result};

use crate::protocol::DEFAULT_MAX_FRAME_LEN;

/// Settings for a coordinator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of devices that must connect before training starts.
    pub num_devices: usize,
    /// Host to bind.
    pub host: String,
    /// Port to bind; 0 picks a free port.
    pub port: u16,
    /// Bound on the whole rendezvous; `None` waits indefinitely.
    pub accept_timeout: Option<Duration>,
    /// Bound on each device's reply during a step; `None` waits indefinitely.
    pub response_timeout: Option<Duration>,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_len: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            host: "localhost".to_string(),
            port: 12345,
            accept_timeout: None,
            response_timeout: Some(Duration::from_secs(300)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TrainerConfig {
    /// Creates a config for `num_devices` devices with default settings.
    pub fn new(num_devices: usize) -> Self {
        Self {
            num_devices,
            ..Self::default()
        }
    }

    /// Builder method to set the bind address.
    #[must_use]
    pub fn address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Builder method to bound the rendezvous.
    #[must_use]
    pub fn accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Builder method to bound each device reply.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Builder method to set the frame size limit.
    #[must_use]
    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Checks the settings before any socket is opened.
    pub fn validate(&self) -> Result<()> {
        if self.num_devices == 0 {
            return Err(Error::invalid_argument("num_devices must be at least 1"));
        }
        if self.host.is_empty() {
            return Err(Error::invalid_argument("host must not be empty"));
        }
        if self.max_frame_len == 0 {
            return Err(Error::invalid_argument("max_frame_len must be at least 1"));
        }
        Ok(())
    }
}
