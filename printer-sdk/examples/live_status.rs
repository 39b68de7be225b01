//! Live status printer
//!
//! Prints one line per status change until Ctrl+C.
//!
//! ```bash
//! PRINTER_HOST=voron.local PRINTER_PORT=7125 cargo run -p printer-sdk --example live_status
//! ```

use printer_sdk::{init_logging_from_env, PrintState, PrinterSystem, SdkError};

#[tokio::main]
async fn main() -> Result<(), SdkError> {
    init_logging_from_env()?;

    let system = PrinterSystem::from_env()?;
    let state = system.connect().await?;
    println!("Connection state: {state:?}");

    let mut status = system.watch_status();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = status.borrow_and_update().clone();
                let file = view.filename.as_deref().unwrap_or("-");
                match view.state {
                    PrintState::Printing | PrintState::Paused => println!(
                        "[{}] {} {:.1}% left {:.0}s | hotend {:.1}/{:.1} bed {:.1}/{:.1}",
                        view.state,
                        file,
                        view.progress * 100.0,
                        view.remaining,
                        view.extruder.temperature,
                        view.extruder.target,
                        view.bed.temperature,
                        view.bed.target,
                    ),
                    _ => println!(
                        "[{}] connected={} ready={} | hotend {:.1} bed {:.1}",
                        view.state,
                        system.connected(),
                        system.ready(),
                        view.extruder.temperature,
                        view.bed.temperature,
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down");
                break;
            }
        }
    }

    system.disconnect().await
}
