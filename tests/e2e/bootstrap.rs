//! Rebuilding the bootstrap target and handing off to a fresh instance.

use crate::e2e::*;

#[test]
fn hands_off_after_rebuild() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "touch stamp:\nbootstrap stamp\ntouch out:\ndefault out\n",
    )?;

    let out = space.run_expect(&mut kiln_command(vec![]))?;
    // "touch stamp" comes from us, the rest from the instance we started.
    assert_output_contains(&out, "touch stamp\n");
    assert_output_contains(&out, "touch out\n");
    assert_output_contains(&out, "kiln: ran 1 steps, now up to date");
    assert!(space.exists("out"));

    let out = space.run_expect(&mut kiln_command(vec![]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "kiln: no work to do\n");
    Ok(())
}

#[test]
fn no_bootstrap_when_cleaning() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "touch stamp:\nbootstrap stamp\ntouch out:\ndefault out\n",
    )?;
    let out = space.run_expect(&mut kiln_command(vec!["--clean"]))?;
    assert_output_not_contains(&out, "touch stamp");
    assert!(!space.exists("stamp"));
    Ok(())
}
