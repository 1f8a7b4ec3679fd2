//! Shared helpers for running the `tfpilot` binary in integration tests.

use std::path::Path;
use std::process::{Command, Output};

const CREDENTIAL_VARS: &[&str] = &[
    "ASC_ISSUER_ID",
    "ASC_KEY_ID",
    "ASC_KEY_PATH",
    "ASC_APP_ID",
    "TFPILOT_CONFIG",
    "RUST_LOG",
];

/// `tfpilot` with the caller's credentials scrubbed and `home` as HOME.
pub fn tfpilot(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tfpilot"));
    for name in CREDENTIAL_VARS {
        cmd.env_remove(name);
    }
    cmd.env("HOME", home).env("XDG_CONFIG_HOME", home.join(".config"));
    cmd
}

pub fn run(mut cmd: Command) -> Output {
    cmd.output().expect("run tfpilot")
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}
