//! Create-or-update reconciliation of gateway, device and sensor records.
//!
//! Identity rules: the gateway entity id is configured, devices are keyed
//! by their `ROMId`, sensors by `(device, kind, instance)`. Reconciling the
//! same document twice therefore never duplicates anything; attributes and
//! values are simply refreshed.

use std::collections::HashMap;

use eds_xml::XmlNode;
use owvocab::Vocabulary;
use tracing::{debug, info};

use crate::directory::{Directory, InputHandler};
use crate::{attr, status, WritablePolicy, DEFAULT_INSTANCE, GATEWAY_CHANNELS, MANUFACTURER_EDS};

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> &'a str {
    params.get(name).map(String::as_str).unwrap_or_default()
}

/// Map the root-level scalar parameters onto the gateway entity.
///
/// The per-channel counters assume the three bus channels of the OWServer
/// ENet family ([`GATEWAY_CHANNELS`]); other gateway models would need a
/// different mapping. Absent parameters are written as empty strings.
pub(crate) fn gateway<D: Directory>(dir: &D, id: &str, params: &HashMap<String, String>) {
    dir.set_attributes(
        id,
        &[
            (attr::MAC.into(), param(params, "MACAddress").into()),
            (attr::HOSTNAME.into(), param(params, "HostName").into()),
            (attr::MANUFACTURER.into(), MANUFACTURER_EDS.into()),
            (attr::MODEL.into(), param(params, "DeviceName").into()),
        ],
    );

    let mut counters: Vec<(String, String)> = vec![(
        status::DEVICES_CONNECTED.into(),
        param(params, "DevicesConnected").into(),
    )];
    for channel in 1..=GATEWAY_CHANNELS {
        for prefix in ["DevicesConnectedChannel", "DataErrorsChannel", "VoltageChannel"] {
            let name = format!("{prefix}{channel}");
            let value = param(params, &name).to_string();
            counters.push((name, value));
        }
    }
    dir.set_status(id, &counters);
}

/// Reconcile one device subnode; returns the number of sensor values
/// published, or `None` when the subnode was skipped.
///
/// A subnode without a `ROMId` is incomplete vendor data, not an error; it
/// is skipped so the remaining devices still reconcile.
pub(crate) fn device<D: Directory>(
    dir: &D,
    vocab: &Vocabulary,
    policy: WritablePolicy,
    handler: &InputHandler,
    node: &XmlNode,
) -> Option<usize> {
    let split = eds_xml::split(node);
    let Some(rom_id) = split.params.get("ROMId").filter(|id| !id.is_empty()) else {
        debug!(element = %node.name, "device subnode without ROMId, skipping");
        return None;
    };

    if !dir.entity_exists(rom_id) {
        let kind = vocab.device_kind(param(&split.params, "Family"));
        dir.create_entity(rom_id, kind);
        info!(rom_id = %rom_id, kind = %kind, "discovered one-wire device");
    }

    // Attributes refresh on every poll on purpose; health and channel move.
    dir.set_attributes(
        rom_id,
        &[
            (attr::ADDRESS.into(), rom_id.clone()),
            (attr::DESCRIPTION.into(), node.description.clone()),
            (attr::MODEL.into(), param(&split.params, "Name").into()),
            (attr::HEALTH.into(), param(&split.params, "Health").into()),
            (attr::CHANNEL.into(), param(&split.params, "Channel").into()),
            (
                attr::RESOLUTION.into(),
                param(&split.params, "Resolution").into(),
            ),
        ],
    );

    let mut published = 0;
    for child in &node.children {
        if sensor(dir, vocab, policy, handler, rom_id, child) {
            published += 1;
        }
    }
    Some(published)
}

/// Reconcile one leaf element under a device; returns whether a value was
/// published.
///
/// Element names outside the sensor table are dropped without a trace;
/// surfacing them would flood the model with vendor-specific noise.
pub(crate) fn sensor<D: Directory>(
    dir: &D,
    vocab: &Vocabulary,
    policy: WritablePolicy,
    handler: &InputHandler,
    device_id: &str,
    node: &XmlNode,
) -> bool {
    let Some(kind) = vocab.sensor_kind(&node.name) else {
        return false;
    };

    if !dir.output_exists(device_id, kind, DEFAULT_INSTANCE) {
        let unit = vocab.unit(&node.units);
        dir.create_output(device_id, kind, DEFAULT_INSTANCE, unit);
        if policy.is_writable(&node.writable) {
            dir.create_input(device_id, kind, DEFAULT_INSTANCE, handler.clone());
        }
    }

    dir.update_output_value(device_id, kind, DEFAULT_INSTANCE, &node.content);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{unsupported_input_handler, MemoryDirectory};
    use owvocab::{DeviceKind, SensorKind, Unit};

    fn leaf(name: &str, content: &str) -> XmlNode {
        XmlNode {
            name: name.into(),
            content: content.into(),
            ..XmlNode::default()
        }
    }

    fn sensor_node(name: &str, content: &str, units: &str, writable: &str) -> XmlNode {
        XmlNode {
            name: name.into(),
            content: content.into(),
            units: units.into(),
            writable: writable.into(),
            ..XmlNode::default()
        }
    }

    fn device_node(rom_id: &str, family: &str) -> XmlNode {
        XmlNode {
            name: "owd_DS18B20".into(),
            description: "Programmable resolution thermometer".into(),
            children: vec![
                leaf("Name", "DS18B20"),
                leaf("ROMId", rom_id),
                leaf("Family", family),
                leaf("Health", "7"),
                leaf("Channel", "1"),
                leaf("Resolution", "12"),
                sensor_node("Temperature", "21.5", "Centigrade", "False"),
            ],
            ..XmlNode::default()
        }
    }

    #[test]
    fn gateway_status_covers_three_channels() {
        let dir = MemoryDirectory::new();
        let params = HashMap::from([
            ("MACAddress".to_string(), "00:11:22:33:44:55".to_string()),
            ("HostName".to_string(), "owserver".to_string()),
            ("DeviceName".to_string(), "OW_SERVER-Enet".to_string()),
            ("DevicesConnected".to_string(), "3".to_string()),
            ("DevicesConnectedChannel1".to_string(), "2".to_string()),
            ("VoltageChannel3".to_string(), "4.93".to_string()),
        ]);
        gateway(&dir, "gw", &params);

        assert_eq!(dir.attribute("gw", attr::MAC).as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(dir.attribute("gw", attr::MANUFACTURER).as_deref(), Some(MANUFACTURER_EDS));
        assert_eq!(dir.status_value("gw", "DevicesConnected").as_deref(), Some("3"));
        assert_eq!(dir.status_value("gw", "DevicesConnectedChannel1").as_deref(), Some("2"));
        assert_eq!(dir.status_value("gw", "VoltageChannel3").as_deref(), Some("4.93"));
        // Absent counters still appear, as empty strings.
        assert_eq!(dir.status_value("gw", "DataErrorsChannel2").as_deref(), Some(""));
    }

    #[test]
    fn device_without_rom_id_is_skipped() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();
        let mut node = device_node("", "28");
        node.children.retain(|c| c.name != "ROMId");

        let outcome = device(&dir, &vocab, WritablePolicy::default(), &handler, &node);
        assert_eq!(outcome, None);
        assert!(dir.entity_ids().is_empty());
    }

    #[test]
    fn device_is_created_once_and_refreshed() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();
        let node = device_node("E100080223A10C28", "28");

        let first = device(&dir, &vocab, WritablePolicy::default(), &handler, &node);
        assert_eq!(first, Some(1));
        assert_eq!(dir.entity_kind("E100080223A10C28"), Some(DeviceKind::Thermometer));
        assert_eq!(
            dir.attribute("E100080223A10C28", attr::MODEL).as_deref(),
            Some("DS18B20")
        );

        // Same document again: no second entity, values refreshed.
        let second = device(&dir, &vocab, WritablePolicy::default(), &handler, &node);
        assert_eq!(second, Some(1));
        assert_eq!(dir.entities_created(), 1);
        assert_eq!(dir.outputs_created(), 1);
    }

    #[test]
    fn unknown_family_defaults_to_unknown_kind() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();
        let node = device_node("A2D90D000800005E", "F7");

        device(&dir, &vocab, WritablePolicy::default(), &handler, &node);
        assert_eq!(dir.entity_kind("A2D90D000800005E"), Some(DeviceKind::Unknown));
    }

    #[test]
    fn unrecognized_sensor_name_is_dropped() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();
        let node = sensor_node("Counter1", "88", "#", "False");

        assert!(!sensor(&dir, &vocab, WritablePolicy::default(), &handler, "dev", &node));
        assert_eq!(dir.output_count(), 0);
    }

    #[test]
    fn unknown_unit_becomes_unspecified() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();
        let node = sensor_node("Temperature", "70.2", "Kelvin", "False");

        assert!(sensor(&dir, &vocab, WritablePolicy::default(), &handler, "dev", &node));
        assert_eq!(
            dir.output_unit("dev", SensorKind::Temperature, DEFAULT_INSTANCE),
            Some(Unit::Unspecified)
        );
        assert_eq!(
            dir.output_value("dev", SensorKind::Temperature, DEFAULT_INSTANCE).as_deref(),
            Some("70.2")
        );
    }

    #[test]
    fn writable_sensor_registers_an_input() {
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();

        // Vendor feeds spell it both "True" and "true".
        for (policy, raw, expected) in [
            (WritablePolicy::CaseInsensitive, "true", true),
            (WritablePolicy::CaseInsensitive, "True", true),
            (WritablePolicy::CaseSensitive, "True", true),
            (WritablePolicy::CaseSensitive, "true", false),
            (WritablePolicy::CaseInsensitive, "False", false),
        ] {
            let dir = MemoryDirectory::new();
            let node = sensor_node("RelayState", "1", "#", raw);
            sensor(&dir, &vocab, policy, &handler, "dev", &node);
            assert_eq!(
                dir.input_exists("dev", SensorKind::Relay, DEFAULT_INSTANCE),
                expected,
                "policy {policy:?} raw {raw:?}"
            );
        }
    }

    #[test]
    fn unit_is_resolved_only_at_creation() {
        let dir = MemoryDirectory::new();
        let vocab = Vocabulary::builtin();
        let handler = unsupported_input_handler();

        let first = sensor_node("Humidity", "40", "PercentRelativeHumidity", "False");
        sensor(&dir, &vocab, WritablePolicy::default(), &handler, "dev", &first);
        let second = sensor_node("Humidity", "41", "Bogus", "False");
        sensor(&dir, &vocab, WritablePolicy::default(), &handler, "dev", &second);

        assert_eq!(
            dir.output_unit("dev", SensorKind::Humidity, DEFAULT_INSTANCE),
            Some(Unit::Percent)
        );
        assert_eq!(
            dir.output_value("dev", SensorKind::Humidity, DEFAULT_INSTANCE).as_deref(),
            Some("41")
        );
    }
}
