use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

#[test]
fn test_batch_end_to_end() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, owner, account, to, amount, currency, key").unwrap();
    writeln!(file, "open, u1, a1, , , KES, ").unwrap();
    writeln!(file, "open, u2, a2, , , KES, ").unwrap();
    writeln!(file, "deposit, u1, a1, , 1000, , ").unwrap();
    writeln!(file, "withdrawal, u1, a1, , 500, , ").unwrap();
    writeln!(file, "transfer, u1, a1, a2, 200, , ").unwrap();

    let mut cmd = Command::new(cargo_bin!("benki"));
    cmd.arg(file.path());

    // a1: 1000 - 500 - 200 = 300 over three mutations; a2 credited once.
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("a1,u1,KES,300,3"))
        .stdout(predicate::str::contains("a2,u2,KES,200,1"));
}

#[test]
fn test_rejected_operations_reported_and_skipped() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, owner, account, to, amount, currency, key").unwrap();
    writeln!(file, "open, u1, a1, , , KES, ").unwrap();
    writeln!(file, "deposit, u1, a1, , 100, , ").unwrap();
    // Overdraft: rejected, balance untouched.
    writeln!(file, "withdrawal, u1, a1, , 500, , ").unwrap();
    // Foreign principal: rejected.
    writeln!(file, "withdrawal, u2, a1, , 50, , ").unwrap();

    let mut cmd = Command::new(cargo_bin!("benki"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing operation"))
        .stdout(predicate::str::contains("a1,u1,KES,100,1"));
}

#[test]
fn test_malformed_rows_reported_and_skipped() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, owner, account, to, amount, currency, key").unwrap();
    writeln!(file, "open, u1, a1, , , KES, ").unwrap();
    writeln!(file, "frobnicate, u1, a1, , 1, , ").unwrap();
    writeln!(file, "deposit, u1, a1, , not_a_number, , ").unwrap();
    writeln!(file, "deposit, u1, a1, , 25, , ").unwrap();

    let mut cmd = Command::new(cargo_bin!("benki"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stdout(predicate::str::contains("a1,u1,KES,25,1"));
}

#[test]
fn test_duplicate_idempotence_key_applies_once() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, owner, account, to, amount, currency, key").unwrap();
    writeln!(file, "open, u1, a1, , , KES, ").unwrap();
    writeln!(file, "deposit, u1, a1, , 100, , k1").unwrap();
    writeln!(file, "deposit, u1, a1, , 100, , k1").unwrap();

    let mut cmd = Command::new(cargo_bin!("benki"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("a1,u1,KES,100,1"));
}

#[test]
fn test_reconcile_flag_reports_clean_batch() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "type, owner, account, to, amount, currency, key").unwrap();
    writeln!(file, "open, u1, a1, , , KES, ").unwrap();
    writeln!(file, "deposit, u1, a1, , 100, , ").unwrap();

    let mut cmd = Command::new(cargo_bin!("benki"));
    cmd.arg(file.path()).arg("--reconcile");

    // Every operation resolved synchronously; nothing left to reconcile.
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("reconciled 0 transactions"))
        .stdout(predicate::str::contains("a1,u1,KES,100,1"));
}
