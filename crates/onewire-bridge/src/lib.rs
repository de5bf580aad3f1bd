#![cfg_attr(docsrs, feature(doc_cfg))]
//! High level OWServer bridge: poll an EDS gateway, normalize its XML feed,
//! and reconcile gateway, device and sensor records into a directory.
//!
//! ```rust,no_run
//! use onewire_bridge::{Bridge, BridgeConfig, MemoryDirectory};
//! use owvocab::Vocabulary;
//!
//! # async fn run() {
//! let directory = MemoryDirectory::new();
//! let bridge = Bridge::new(directory, Vocabulary::builtin(), BridgeConfig::default());
//! bridge.setup_gateway_entity("10.0.0.5");
//! let report = bridge.poll().await;
//! println!("poll finished: {}", report.state);
//! # }
//! ```
//!
//! One poll cycle walks `Fetching -> Parsing -> Reconciling` and ends in
//! `Ready` or `Error` on the gateway entity. Failures never escape as
//! process faults; they degrade to an error status and the next scheduled
//! poll retries.

pub use eds_xml;
pub use owvocab;
pub use tl_eds;

mod directory;
mod reconcile;

use std::collections::HashMap;
use std::time::Duration;

use eds_xml::{XmlError, XmlNode};
use owvocab::{DeviceKind, Vocabulary};
use thiserror::Error;
use tl_eds::{Endpoint, FetchError};
use tracing::{debug, info};

pub use directory::{
    unsupported_input_handler, Directory, InputCommand, InputHandler, MemoryDirectory, RunState,
};

/// Default entity id of the gateway record.
pub const DEFAULT_GATEWAY_ID: &str = "gateway";
/// Output instance used for every sensor; EDS devices report one reading
/// per sensor kind.
pub const DEFAULT_INSTANCE: &str = "0";
/// Manufacturer attribute written on the gateway entity.
pub const MANUFACTURER_EDS: &str = "Embedded Data Systems (EDS)";
/// Bus channels of the OWServer ENet hardware family. The per-channel
/// status mapping is tied to this model; it is not derived from the feed.
pub const GATEWAY_CHANNELS: u8 = 3;

/// Configuration keys read from the directory each cycle.
pub mod keys {
    /// Gateway address, `host[:port]` or `file://path`.
    pub const ADDRESS: &str = "address";
    /// Basic auth login name.
    pub const LOGIN_NAME: &str = "loginName";
    /// Basic auth password.
    pub const PASSWORD: &str = "password";
    /// Requested poll interval in seconds.
    pub const POLL_INTERVAL: &str = "pollInterval";
}

/// Attribute keys written on entities.
pub mod attr {
    pub const ADDRESS: &str = "address";
    pub const DESCRIPTION: &str = "description";
    pub const HOSTNAME: &str = "hostname";
    pub const MAC: &str = "mac";
    pub const MANUFACTURER: &str = "manufacturer";
    pub const MODEL: &str = "model";
    // Vendor-named device properties, kept under their feed spelling.
    pub const HEALTH: &str = "Health";
    pub const CHANNEL: &str = "Channel";
    pub const RESOLUTION: &str = "Resolution";
}

/// Status keys written on the gateway entity.
pub mod status {
    pub const DEVICES_CONNECTED: &str = "DevicesConnected";
    /// Feed retrieval latency in milliseconds.
    pub const LATENCY_MSEC: &str = "latencymsec";
}

/// How the `Writable` attribute of a sensor element is interpreted.
///
/// Observed gateway firmwares spell the value both `True` and `true`, so
/// the comparison policy is explicit instead of guessed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WritablePolicy {
    /// Only the exact string `True` marks a sensor writable.
    CaseSensitive,
    /// Any capitalization of `true` marks a sensor writable.
    #[default]
    CaseInsensitive,
}

impl WritablePolicy {
    /// Apply the policy to a raw `Writable` attribute value.
    pub fn is_writable(self, raw: &str) -> bool {
        match self {
            WritablePolicy::CaseSensitive => raw == "True",
            WritablePolicy::CaseInsensitive => raw.eq_ignore_ascii_case("true"),
        }
    }
}

/// Failure of one poll cycle step, before it degrades to gateway status.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Xml(#[from] XmlError),
}

/// Step of the poll cycle where a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Fetching,
    Parsing,
}

/// Outcome of one poll cycle, for observability; the authoritative result
/// lives on the gateway entity.
#[derive(Debug, Clone)]
pub struct PollReport {
    /// `Ready` or `Error`, mirroring the gateway run state.
    pub state: RunState,
    /// Step that failed, `None` on success.
    pub failed_phase: Option<PollPhase>,
    /// Error message written to the gateway entity, `None` on success.
    pub message: Option<String>,
    /// Feed retrieval latency, `None` when fetching failed.
    pub latency: Option<Duration>,
    /// Device subnodes reconciled (skipped ones excluded).
    pub devices_seen: usize,
    /// Sensor values published across all devices.
    pub sensors_published: usize,
}

impl PollReport {
    fn failed(phase: PollPhase, message: String) -> Self {
        Self {
            state: RunState::Error,
            failed_phase: Some(phase),
            message: Some(message),
            latency: None,
            devices_seen: 0,
            sensors_published: 0,
        }
    }
}

/// Bridge settings; everything else is read from the directory at poll time.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Entity id of the gateway record.
    pub gateway_id: String,
    /// Interpretation of the `Writable` sensor attribute.
    pub writable_policy: WritablePolicy,
    /// Upper bound for one feed retrieval.
    pub fetch_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gateway_id: DEFAULT_GATEWAY_ID.to_string(),
            writable_policy: WritablePolicy::default(),
            fetch_timeout: tl_eds::consts::FETCH_TIMEOUT,
        }
    }
}

/// The poll orchestrator: owns the directory seam, the vocabulary and the
/// input handler, and drives one fetch/parse/reconcile cycle per call.
pub struct Bridge<D: Directory> {
    directory: D,
    vocab: Vocabulary,
    config: BridgeConfig,
    input_handler: InputHandler,
}

impl<D: Directory> Bridge<D> {
    /// Create a bridge with the default (log-and-drop) input handler.
    pub fn new(directory: D, vocab: Vocabulary, config: BridgeConfig) -> Self {
        Self {
            directory,
            vocab,
            config,
            input_handler: unsupported_input_handler(),
        }
    }

    /// Replace the handler attached to newly registered control inputs.
    pub fn with_input_handler(mut self, handler: InputHandler) -> Self {
        self.input_handler = handler;
        self
    }

    /// Access the directory collaborator.
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Entity id of the gateway record.
    pub fn gateway_id(&self) -> &str {
        &self.config.gateway_id
    }

    /// Create the gateway entity with its configuration entries unless it
    /// already exists. Called once at startup.
    pub fn setup_gateway_entity(&self, default_address: &str) {
        let gw = &self.config.gateway_id;
        if self.directory.entity_exists(gw) {
            return;
        }
        self.directory.create_entity(gw, DeviceKind::Gateway);
        self.directory.set_config(gw, keys::ADDRESS, default_address);
        self.directory.set_config(gw, keys::LOGIN_NAME, "");
        self.directory.set_config(gw, keys::PASSWORD, "");
        info!(gateway = %gw, address = default_address, "gateway entity created");
    }

    /// Accept a configuration update for an entity and store it verbatim.
    pub fn handle_config(&self, entity: &str, values: &HashMap<String, String>) {
        for (key, value) in values {
            self.directory.set_config(entity, key, value);
        }
        info!(entity = %entity, count = values.len(), "configuration updated");
    }

    /// Run one poll cycle.
    ///
    /// Gateway status is reconciled before any device; devices follow in
    /// document order. A device that cannot be reconciled is skipped
    /// without aborting the rest.
    pub async fn poll(&self) -> PollReport {
        let gw = self.config.gateway_id.clone();
        let endpoint = self.endpoint_from_config(&gw);

        let (root, latency) = match self.fetch_and_parse(&endpoint).await {
            Ok(ok) => ok,
            Err(err) => {
                let (phase, message) = describe_failure(&endpoint, &err);
                info!(gateway = %gw, %message, "poll cycle failed");
                self.directory.set_error_status(&gw, &message);
                return PollReport::failed(phase, message);
            }
        };

        let top = eds_xml::split(&root);
        reconcile::gateway(&self.directory, &gw, &top.params);
        self.directory.set_run_state(&gw, RunState::Ready);
        self.directory.set_status(
            &gw,
            &[(
                status::LATENCY_MSEC.to_string(),
                latency.as_millis().to_string(),
            )],
        );

        let mut devices_seen = 0;
        let mut sensors_published = 0;
        for node in &top.subnodes {
            if let Some(published) = reconcile::device(
                &self.directory,
                &self.vocab,
                self.config.writable_policy,
                &self.input_handler,
                node,
            ) {
                devices_seen += 1;
                sensors_published += published;
            }
        }
        debug!(
            gateway = %gw,
            devices = devices_seen,
            sensors = sensors_published,
            latency_ms = latency.as_millis() as u64,
            "poll cycle complete"
        );

        // Reconfiguration side-channel, separate from the data flow.
        if let Some(interval) = self.directory.config_int(&gw, keys::POLL_INTERVAL) {
            if interval > 0 {
                self.directory.request_poll_interval(interval as u64);
            }
        }

        PollReport {
            state: RunState::Ready,
            failed_phase: None,
            message: None,
            latency: Some(latency),
            devices_seen,
            sensors_published,
        }
    }

    fn endpoint_from_config(&self, gw: &str) -> Endpoint {
        let address = self
            .directory
            .config_value(gw, keys::ADDRESS)
            .unwrap_or_default();
        let login = self
            .directory
            .config_value(gw, keys::LOGIN_NAME)
            .unwrap_or_default();
        let password = self
            .directory
            .config_value(gw, keys::PASSWORD)
            .unwrap_or_default();
        Endpoint::new(address)
            .with_credentials(login, password)
            .with_timeout(self.config.fetch_timeout)
    }

    async fn fetch_and_parse(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(XmlNode, Duration), BridgeError> {
        let fetched = tl_eds::fetch(endpoint).await?;
        let root = eds_xml::parse(&fetched.body)?;
        Ok((root, fetched.latency))
    }
}

fn describe_failure(endpoint: &Endpoint, err: &BridgeError) -> (PollPhase, String) {
    match err {
        BridgeError::Fetch(FetchError::AddressMissing) => (
            PollPhase::Fetching,
            "a gateway address has not been configured".to_string(),
        ),
        BridgeError::Fetch(err) => (
            PollPhase::Fetching,
            format!("unable to read the gateway at {}: {err}", endpoint.address),
        ),
        BridgeError::Xml(err) => (
            PollPhase::Parsing,
            format!("invalid status feed from {}: {err}", endpoint.address),
        ),
    }
}
