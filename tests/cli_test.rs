use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/scenario.json")
        .arg("tests/fixtures/commands.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "payment,state,capturable,refundable,frozen",
        ))
        // Partially released by the payer during the escrow period
        .stdout(predicate::str::contains("p1,in_escrow,60,40,false"))
        // Released by the receiver once unfrozen and past the period
        .stdout(predicate::str::contains("p2,released,0,50,false"))
        .stdout(predicate::str::contains("p3,in_escrow,10,0,false"))
        // Receiver releases inside the period and while frozen are refused
        .stderr(predicate::str::contains("Error processing command").count(2))
        .stderr(predicate::str::contains("release is locked"));

    Ok(())
}

#[test]
fn test_cli_writes_audit_log() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let audit_path = dir.path().join("audit.jsonl");

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("tests/fixtures/scenario.json")
        .arg("tests/fixtures/commands.csv")
        .arg("--audit")
        .arg(&audit_path);
    cmd.assert().success();

    let audit = std::fs::read_to_string(&audit_path)?;
    let entries: Vec<serde_json::Value> = audit
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;

    let transitions = entries
        .iter()
        .filter(|e| e["event"].get("transition").is_some())
        .count();
    // Three authorizations and two releases.
    assert_eq!(transitions, 5);
    assert!(entries.iter().any(|e| e["event"] == "freeze"));
    assert!(entries.iter().any(|e| e["event"] == "unfreeze"));
    assert!(entries.iter().any(|e| e["event"].get("deployment").is_some()));

    // Identities are rendered as 64-character lowercase hex strings.
    let is_hex_id = |v: &serde_json::Value| {
        v.as_str().is_some_and(|s| {
            s.len() == 64 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        })
    };
    let with_payment: Vec<_> = entries.iter().filter(|e| e.get("payment_id").is_some()).collect();
    assert_eq!(with_payment.len(), 7);
    assert!(with_payment.iter().all(|e| is_hex_id(&e["payment_id"])));
    assert!(entries
        .iter()
        .filter_map(|e| e.get("instance"))
        .all(is_hex_id));

    // Sequences are contiguous from 1.
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry["sequence"], (i + 1) as u64);
    }
    Ok(())
}

#[test]
fn test_cli_rejects_invalid_config() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = tempfile::NamedTempFile::new()?;
    std::io::Write::write_all(&mut config, b"{ \"coordinator\": \"operator\" }")?;

    let mut cmd = Command::new(cargo_bin!());
    cmd.arg(config.path()).arg("tests/fixtures/commands.csv");
    cmd.assert().failure();
    Ok(())
}
