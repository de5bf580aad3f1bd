//! Poll a gateway (or a saved feed) once and dump the resulting model.
//!
//! Usage: `cargo run -p onewire-bridge --example poll_once -- <address>`
//! where `<address>` is `host[:port]` or `file://path/to/details.xml`.

use onewire_bridge::{attr, Bridge, BridgeConfig, MemoryDirectory, RunState};
use owvocab::Vocabulary;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let address = std::env::args().nth(1).unwrap_or_default();

    let bridge = Bridge::new(
        MemoryDirectory::new(),
        Vocabulary::builtin(),
        BridgeConfig::default(),
    );
    bridge.setup_gateway_entity(&address);
    let report = bridge.poll().await;

    match report.state {
        RunState::Ready => {
            println!(
                "poll ok: {} devices, {} sensor values, latency {:?}",
                report.devices_seen,
                report.sensors_published,
                report.latency.unwrap_or_default()
            );
            let dir = bridge.directory();
            for id in dir.entity_ids() {
                let kind = dir
                    .entity_kind(&id)
                    .map(|k| k.to_string())
                    .unwrap_or_default();
                let model = dir.attribute(&id, attr::MODEL).unwrap_or_default();
                println!("  {id} kind={kind} model={model}");
            }
        }
        RunState::Error => {
            eprintln!("poll failed: {}", report.message.unwrap_or_default());
        }
    }
}
