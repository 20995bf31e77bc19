//! Connect to a heat pump and print status snapshots.
//!
//! Usage: `monitor <port>` where port is a serial device path or
//! `tcp://host:port` for a serial bridge. Run without arguments to list
//! the ports on this machine.

use std::time::Duration;

use heatlink_core::config::LinkConfig;
use heatlink_core::link::HeatPump;
use heatlink_core::protocol::list_ports;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Some(port) = std::env::args().nth(1) else {
        eprintln!("usage: monitor <port>");
        eprintln!("available ports:");
        for name in list_ports() {
            eprintln!("  {name}");
        }
        std::process::exit(2);
    };

    let mut pump = HeatPump::initialize(LinkConfig::for_port(port))?;

    let mut seconds = 0u64;
    loop {
        pump.tick();
        std::thread::sleep(Duration::from_secs(1));
        seconds += 1;

        if seconds % 30 == 0 {
            if pump.is_connected() {
                println!("{}", serde_json::to_string_pretty(&pump.get_status())?);
                println!(
                    "frames rx/tx: {}/{}",
                    pump.rx_frame_count(),
                    pump.tx_frame_count()
                );
            } else {
                println!("heat pump disconnected ({:?})", pump.connection_state());
            }
        }
    }
}
