//! Tests for behavior around missing files and targets.

use crate::e2e::*;

#[test]
fn missing_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\ntouch out: in\n")?;

    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "source file in is missing, needed by out");
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn undeclared_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "touch out: in\n")?;
    space.write("in", "x")?;

    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln.rules:1: out: source 'in' is not declared");
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "touch out:\n")?;

    let out = space.run(&mut kiln_command(vec!["nope"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln: error: unknown target 'nope'");
    Ok(())
}

#[test]
fn missing_catalog() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln: error: read kiln.rules:");
    Ok(())
}

/// Truncated output from an interrupted run counts as missing.
#[test]
fn empty_output_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\nconcat out: in\n")?;
    space.write("in", "x")?;
    space.write("out", "")?;

    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "Concating out");
    assert_eq!(space.read("out")?, b"x");
    Ok(())
}
