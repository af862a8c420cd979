use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn lc2() -> Command {
    let mut cmd = Command::cargo_bin("lc2").unwrap();
    cmd.env_remove("LC2_EXTENSIONS").env_remove("LC2_LOG");
    cmd
}

fn tmp_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name)
}

#[test]
fn runs_without_arguments() {
    lc2()
        .assert()
        .success()
        .stdout(predicate::str::contains("--help"));
}

#[test]
fn runs_hello_world() {
    lc2()
        .arg("run")
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, world!"));
}

#[test]
fn runs_path_without_subcommand() {
    lc2()
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, world!"));
}

#[test]
fn prints_packed_strings() {
    lc2()
        .arg("run")
        .arg("tests/files/putsp.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello"));
}

#[test]
fn reads_piped_input() {
    lc2()
        .arg("run")
        .arg("tests/files/echo.asm")
        .write_stdin("abc")
        .assert()
        .success()
        .stdout(predicate::str::contains("abc"));
}

#[test]
fn fails_when_input_runs_out() {
    lc2()
        .arg("run")
        .arg("tests/files/echo.asm")
        .write_stdin("a")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input ended"));
}

#[test]
fn check_passes_valid_file() {
    lc2()
        .arg("check")
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("no errors found"));
}

#[test]
fn check_reports_every_error() {
    lc2()
        .arg("check")
        .arg("tests/files/broken.asm")
        .assert()
        .failure()
        .stderr(predicate::str::contains("assembly failed with 2 error(s)"));
}

#[test]
fn check_prints_warnings() {
    lc2()
        .arg("check")
        .arg("tests/files/no_end.asm")
        .assert()
        .success()
        .stderr(predicate::str::contains("final instruction isn't .END"));
}

#[test]
fn compiles_and_runs_object_file() {
    let dest = tmp_path("hello.obj");
    lc2()
        .arg("compile")
        .arg("tests/files/hello.asm")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved"));

    let bytes = std::fs::read(&dest).unwrap();
    // Origin first, big-endian
    assert_eq!(&bytes[..4], &[0x30, 0x00, 0xE0, 0x03]);

    lc2()
        .arg("run")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, world!"));
}

#[test]
fn rejects_unknown_extension() {
    lc2()
        .arg("run")
        .arg("Cargo.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown extension"));
}

#[test]
fn lists_assembled_words() {
    lc2()
        .arg("list")
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("(0000) 3000"))
        .stdout(predicate::str::contains(".ORIG x3000"))
        .stdout(predicate::str::contains("(3000) E003"));
}

#[test]
fn lists_symbol_table() {
    lc2()
        .arg("list")
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("Symbol table"))
        .stdout(predicate::str::contains("MSG              x3003"));
}

#[test]
fn dumps_memory_after_halt() {
    lc2()
        .arg("run")
        .arg("--minimal")
        .arg("--mem-dump")
        .arg("tests/files/hello.asm")
        .assert()
        .success()
        .stderr(predicate::str::contains("R0 0\n"))
        .stderr(predicate::str::contains("x3000 57347\n"));
}

#[test]
fn char_literals_need_extensions() {
    lc2()
        .arg("check")
        .arg("tests/files/char.asm")
        .assert()
        .failure();

    lc2()
        .env("LC2_EXTENSIONS", "1")
        .arg("run")
        .arg("tests/files/char.asm")
        .assert()
        .success()
        .stdout(predicate::str::contains("A"));
}

#[test]
fn warns_about_unmapped_trap() {
    lc2()
        .arg("run")
        .arg("tests/files/bad_trap.asm")
        .assert()
        .success()
        .stderr(predicate::str::contains("TRAP x30 at x3000 has no routine installed"));
}
