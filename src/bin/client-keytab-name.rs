//! Print where the calling user's keytab is expected to be. Touches no files.

use std::process::ExitCode;

use kcron::{Identity, KeytabLayout};

fn main() -> ExitCode {
    kcron::logging::configure_logging();

    let paths = KeytabLayout::from_config().and_then(|layout| {
        layout.user_paths(Identity::current().uid)
    });
    match paths {
        Ok(paths) => {
            println!("{}", paths.full_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("client-keytab-name: {e}");
            ExitCode::FAILURE
        }
    }
}
