//! Ensure the calling user has an empty keytab at the expected location and print its path.
//!
//! Installed with `CAP_CHOWN` and `CAP_DAC_OVERRIDE`. The process is hardened before it does
//! anything else, and holds no capabilities at all by the time it prints.

use std::path::PathBuf;
use std::process::ExitCode;

use kcron::{KeytabLayout, Sandbox};

fn main() -> ExitCode {
    // Before hardening, while new descriptors and allocations are still unrestricted.
    kcron::logging::configure_logging();

    match init() {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("init-kcron-keytab: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init() -> kcron::Result<PathBuf> {
    // Pure computation on compiled-in constants. Hardening needs it first: filesystem scoping
    // confines the process beneath the parent of the base directory.
    let layout = KeytabLayout::from_config()?;
    let hardened = Sandbox::new(&layout).harden()?;
    tracing::debug!(?hardened, "hardened");
    kcron::init::run(layout)
}
