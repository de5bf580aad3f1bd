//! Directory/publisher seam and an in-memory implementation.
//!
//! The bridge never owns entity storage, persistence or pub/sub delivery;
//! it reports into whatever implements [`Directory`]. Only one poll cycle
//! runs at a time, so implementations just need interior mutability, not
//! cross-poll coordination.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use owvocab::{DeviceKind, SensorKind, Unit};
use tracing::warn;

/// Run state reported on the gateway entity after each poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The last cycle completed and the model is current.
    Ready,
    /// The last cycle failed; `last_error` carries the reason.
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Ready => f.write_str("ready"),
            RunState::Error => f.write_str("error"),
        }
    }
}

/// A request to set the value of a writable sensor.
#[derive(Debug, Clone)]
pub struct InputCommand {
    /// Entity id of the owning device (its ROMId).
    pub device: String,
    /// Normalized sensor kind of the input.
    pub kind: SensorKind,
    /// Output instance, [`crate::DEFAULT_INSTANCE`] unless stated otherwise.
    pub instance: String,
    /// Requested value, raw text.
    pub value: String,
}

/// Callback invoked when the directory delivers a set-input request.
pub type InputHandler = Arc<dyn Fn(&InputCommand) + Send + Sync>;

/// Handler that logs and drops the request; one-wire inputs are not
/// controllable through the EDS feed.
pub fn unsupported_input_handler() -> InputHandler {
    Arc::new(|cmd: &InputCommand| {
        warn!(device = %cmd.device, kind = %cmd.kind, "set-input ignored, not supported");
    })
}

/// Contract of the external entity directory and publisher.
///
/// Every call may block but must eventually return; none of them fail from
/// the bridge's point of view. Concurrency guarding of the entity store is
/// the implementor's concern.
pub trait Directory {
    /// Read one configuration value of an entity.
    fn config_value(&self, entity: &str, key: &str) -> Option<String>;
    /// Read one configuration value as an integer.
    fn config_int(&self, entity: &str, key: &str) -> Option<i64>;
    /// Write one configuration value of an entity.
    fn set_config(&self, entity: &str, key: &str, value: &str);

    /// Register a new entity of the given kind.
    fn create_entity(&self, id: &str, kind: DeviceKind);
    /// Whether an entity with this id is already registered.
    fn entity_exists(&self, id: &str) -> bool;
    /// Replace the listed attributes of an entity.
    fn set_attributes(&self, id: &str, attrs: &[(String, String)]);
    /// Replace the listed status values of an entity.
    fn set_status(&self, id: &str, status: &[(String, String)]);
    /// Mark an entity ready; clears any recorded error.
    fn set_run_state(&self, id: &str, state: RunState);
    /// Mark an entity failed with a human-readable message.
    fn set_error_status(&self, id: &str, message: &str);

    /// Whether a sensor output is already registered.
    fn output_exists(&self, device: &str, kind: SensorKind, instance: &str) -> bool;
    /// Register a sensor output with its normalized unit.
    fn create_output(&self, device: &str, kind: SensorKind, instance: &str, unit: Unit);
    /// Register a control input for a writable sensor.
    fn create_input(&self, device: &str, kind: SensorKind, instance: &str, handler: InputHandler);
    /// Publish the latest value of a sensor output.
    fn update_output_value(&self, device: &str, kind: SensorKind, instance: &str, value: &str);

    /// Ask the scheduler to poll at a new interval from the next cycle on.
    fn request_poll_interval(&self, seconds: u64);
}

#[derive(Debug, Default, Clone)]
struct EntityRecord {
    kind: Option<DeviceKind>,
    attrs: HashMap<String, String>,
    status: HashMap<String, String>,
    config: HashMap<String, String>,
    run_state: Option<RunState>,
    last_error: Option<String>,
}

#[derive(Clone)]
struct OutputRecord {
    unit: Unit,
    value: Option<String>,
}

type OutputKey = (String, SensorKind, String);

#[derive(Default)]
struct Inner {
    entities: HashMap<String, EntityRecord>,
    outputs: HashMap<OutputKey, OutputRecord>,
    inputs: HashMap<OutputKey, InputHandler>,
    requested_interval: Option<u64>,
    entities_created: usize,
    outputs_created: usize,
}

/// In-memory [`Directory`] used by the CLI and the tests.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only happens after a panic in another test thread.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Ids of all registered entities, unordered.
    pub fn entity_ids(&self) -> Vec<String> {
        self.lock().entities.keys().cloned().collect()
    }

    /// Kind an entity was created with.
    pub fn entity_kind(&self, id: &str) -> Option<DeviceKind> {
        self.lock().entities.get(id).and_then(|e| e.kind)
    }

    /// One attribute of an entity.
    pub fn attribute(&self, id: &str, key: &str) -> Option<String> {
        self.lock()
            .entities
            .get(id)
            .and_then(|e| e.attrs.get(key).cloned())
    }

    /// One status value of an entity.
    pub fn status_value(&self, id: &str, key: &str) -> Option<String> {
        self.lock()
            .entities
            .get(id)
            .and_then(|e| e.status.get(key).cloned())
    }

    /// Current run state of an entity.
    pub fn run_state(&self, id: &str) -> Option<RunState> {
        self.lock().entities.get(id).and_then(|e| e.run_state)
    }

    /// Last recorded error message of an entity.
    pub fn last_error(&self, id: &str) -> Option<String> {
        self.lock().entities.get(id).and_then(|e| e.last_error.clone())
    }

    /// Latest published value of an output.
    pub fn output_value(&self, device: &str, kind: SensorKind, instance: &str) -> Option<String> {
        self.lock()
            .outputs
            .get(&key(device, kind, instance))
            .and_then(|o| o.value.clone())
    }

    /// Normalized unit an output was registered with.
    pub fn output_unit(&self, device: &str, kind: SensorKind, instance: &str) -> Option<Unit> {
        self.lock().outputs.get(&key(device, kind, instance)).map(|o| o.unit)
    }

    /// Whether a control input exists for the sensor.
    pub fn input_exists(&self, device: &str, kind: SensorKind, instance: &str) -> bool {
        self.lock().inputs.contains_key(&key(device, kind, instance))
    }

    /// Deliver a set-input request to the registered handler, if any.
    pub fn dispatch_input(&self, cmd: &InputCommand) -> bool {
        let handler = self
            .lock()
            .inputs
            .get(&key(&cmd.device, cmd.kind, &cmd.instance))
            .cloned();
        match handler {
            Some(handler) => {
                handler(cmd);
                true
            }
            None => false,
        }
    }

    /// Poll interval most recently requested by the bridge.
    pub fn requested_interval(&self) -> Option<u64> {
        self.lock().requested_interval
    }

    /// Number of `create_entity` calls, for idempotence checks.
    pub fn entities_created(&self) -> usize {
        self.lock().entities_created
    }

    /// Number of `create_output` calls, for idempotence checks.
    pub fn outputs_created(&self) -> usize {
        self.lock().outputs_created
    }

    /// Number of registered outputs.
    pub fn output_count(&self) -> usize {
        self.lock().outputs.len()
    }
}

fn key(device: &str, kind: SensorKind, instance: &str) -> OutputKey {
    (device.to_string(), kind, instance.to_string())
}

impl Directory for MemoryDirectory {
    fn config_value(&self, entity: &str, key: &str) -> Option<String> {
        self.lock()
            .entities
            .get(entity)
            .and_then(|e| e.config.get(key).cloned())
    }

    fn config_int(&self, entity: &str, key: &str) -> Option<i64> {
        self.config_value(entity, key).and_then(|v| v.parse().ok())
    }

    fn set_config(&self, entity: &str, key: &str, value: &str) {
        self.lock()
            .entities
            .entry(entity.to_string())
            .or_default()
            .config
            .insert(key.to_string(), value.to_string());
    }

    fn create_entity(&self, id: &str, kind: DeviceKind) {
        let mut inner = self.lock();
        inner.entities_created += 1;
        inner.entities.entry(id.to_string()).or_default().kind = Some(kind);
    }

    fn entity_exists(&self, id: &str) -> bool {
        self.lock()
            .entities
            .get(id)
            .map(|e| e.kind.is_some())
            .unwrap_or(false)
    }

    fn set_attributes(&self, id: &str, attrs: &[(String, String)]) {
        let mut inner = self.lock();
        let entity = inner.entities.entry(id.to_string()).or_default();
        for (key, value) in attrs {
            entity.attrs.insert(key.clone(), value.clone());
        }
    }

    fn set_status(&self, id: &str, status: &[(String, String)]) {
        let mut inner = self.lock();
        let entity = inner.entities.entry(id.to_string()).or_default();
        for (key, value) in status {
            entity.status.insert(key.clone(), value.clone());
        }
    }

    fn set_run_state(&self, id: &str, state: RunState) {
        let mut inner = self.lock();
        let entity = inner.entities.entry(id.to_string()).or_default();
        entity.run_state = Some(state);
        if state == RunState::Ready {
            entity.last_error = None;
        }
    }

    fn set_error_status(&self, id: &str, message: &str) {
        let mut inner = self.lock();
        let entity = inner.entities.entry(id.to_string()).or_default();
        entity.run_state = Some(RunState::Error);
        entity.last_error = Some(message.to_string());
    }

    fn output_exists(&self, device: &str, kind: SensorKind, instance: &str) -> bool {
        self.lock().outputs.contains_key(&key(device, kind, instance))
    }

    fn create_output(&self, device: &str, kind: SensorKind, instance: &str, unit: Unit) {
        let mut inner = self.lock();
        inner.outputs_created += 1;
        inner
            .outputs
            .entry(key(device, kind, instance))
            .or_insert(OutputRecord { unit, value: None });
    }

    fn create_input(&self, device: &str, kind: SensorKind, instance: &str, handler: InputHandler) {
        self.lock().inputs.insert(key(device, kind, instance), handler);
    }

    fn update_output_value(&self, device: &str, kind: SensorKind, instance: &str, value: &str) {
        let mut inner = self.lock();
        if let Some(output) = inner.outputs.get_mut(&key(device, kind, instance)) {
            output.value = Some(value.to_string());
        }
    }

    fn request_poll_interval(&self, seconds: u64) {
        self.lock().requested_interval = Some(seconds);
    }
}
