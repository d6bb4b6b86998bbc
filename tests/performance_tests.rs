use assert_cmd::cargo_bin;
use std::process::Command;

mod common;

const PAYMENTS: usize = 2_000;

#[test]
fn test_large_command_stream() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("scenario.json");
    let commands = dir.path().join("commands.csv");
    common::write_scenario(&config, &common::scenario_json(PAYMENTS, true)).unwrap();
    common::generate_commands(&commands, PAYMENTS).expect("Failed to generate commands");

    let output = Command::new(cargo_bin!("escrow-policy"))
        .arg(&config)
        .arg(&commands)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "Binary failed to process the stream");

    let stdout = String::from_utf8_lossy(&output.stdout);
    // Header plus one row per payment, all half released after the period.
    assert_eq!(stdout.lines().count(), PAYMENTS + 1);
    assert_eq!(
        stdout
            .lines()
            .filter(|l| l.ends_with(",in_escrow,5,5,false"))
            .count(),
        PAYMENTS
    );
    assert!(output.stderr.is_empty());
}
