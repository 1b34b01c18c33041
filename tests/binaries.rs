use std::path::Path;
use std::process::Command;

use kcron::{config, Identity, KeytabLayout};

#[test]
fn client_keytab_name_prints_expected_path() -> eyre::Result<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_client-keytab-name")).output()?;
    assert!(output.status.success(), "{output:?}");

    let expected = KeytabLayout::from_config()?.user_paths(Identity::current().uid)?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, format!("{}\n", expected.full_path.display()));
    assert!(output.stderr.is_empty());
    Ok(())
}

#[test]
fn client_keytab_name_ignores_runtime_environment() -> eyre::Result<()> {
    let plain = Command::new(env!("CARGO_BIN_EXE_client-keytab-name")).output()?;
    let overridden = Command::new(env!("CARGO_BIN_EXE_client-keytab-name"))
        .env("KCRON_CLIENT_KEYTAB_DIR", "/tmp/elsewhere")
        .env("KCRON_LOG", "trace")
        .output()?;
    assert_eq!(plain.stdout, overridden.stdout);
    assert!(overridden.stderr.is_empty());
    Ok(())
}

#[test]
fn init_fails_with_one_line_without_base_dir() -> eyre::Result<()> {
    if Path::new(config::CLIENT_KEYTAB_DIR).exists() {
        // Only meaningful on hosts without an installed keytab directory.
        return Ok(());
    }

    let output = Command::new(env!("CARGO_BIN_EXE_init-kcron-keytab")).output()?;
    assert!(!output.status.success(), "{output:?}");
    assert!(output.stdout.is_empty());

    let stderr = String::from_utf8(output.stderr)?;
    assert_eq!(stderr.lines().count(), 1, "{stderr}");
    assert!(stderr.starts_with("init-kcron-keytab: "), "{stderr}");
    Ok(())
}
