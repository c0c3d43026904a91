use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "")?;
    let out = space.run(&mut kiln_command(vec![]))?;
    assert!(!out.status.success());
    assert_eq!(
        std::str::from_utf8(&out.stdout)?,
        "kiln: error: no target specified and no default\n"
    );
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\ntouch out: in\n")?;
    space.write("in", "x")?;
    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "touch out");
    assert_output_contains(&out, "kiln: ran 1 steps, now up to date");
    assert!(space.read("out").is_ok());

    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "kiln: no work to do\n");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // Run a build rule that needs a subdir to be automatically created.
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\ntouch subdir/out: in\n")?;
    space.write("in", "x")?;
    space.run_expect(&mut kiln_command(vec!["subdir/out"]))?;
    assert!(space.read("subdir/out").is_ok());
    Ok(())
}

#[test]
fn default_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "touch a:\ntouch b:\ntouch c:\ndefault a c\n",
    )?;
    let out = space.run_expect(&mut kiln_command(vec![]))?;
    assert_output_contains(&out, "kiln: ran 2 steps");
    assert!(space.exists("a"));
    assert!(!space.exists("b"));
    assert!(space.exists("c"));
    Ok(())
}

#[test]
fn catalog_in_other_directory() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("sub/build.rules", "touch out:\n")?;
    space.run_expect(&mut kiln_command(vec!["-C", "sub", "-f", "build.rules", "out"]))?;
    assert!(space.exists("sub/out"));
    Ok(())
}

#[test]
fn changed_input_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file a b\nconcat out: a b\n")?;
    space.write("a", "one\n")?;
    space.write("b", "two\n")?;
    space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"one\ntwo\n");

    space.age("out", 10)?;
    space.write("b", "three\n")?;
    let out = space.run_expect(&mut kiln_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "-- out <= { b }");
    assert_output_contains(&out, "Concating out");
    assert_eq!(space.read("out")?, b"one\nthree\n");
    Ok(())
}

#[test]
fn dry_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\ntouch mid: in\nconcat out: mid\n")?;
    space.write("in", "x")?;
    let out = space.run_expect(&mut kiln_command(vec!["-n", "out"]))?;
    assert_output_contains(&out, "touch mid");
    assert_output_contains(&out, "Concating out");
    assert_output_contains(&out, "kiln: ran 2 steps");
    assert!(!space.exists("mid"));
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn clean() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\nconcat out: in\n")?;
    space.write("in", "x")?;
    space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert!(space.exists("out"));

    let out = space.run_expect(&mut kiln_command(vec!["--clean", "out"]))?;
    assert_output_contains(&out, "rm out");
    assert_output_not_contains(&out, "rm in");
    assert!(!space.exists("out"));
    assert!(space.exists("in"));
    Ok(())
}

#[test]
fn verbose_reasons() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", "file in\nconcat out: in\n")?;
    space.write("in", "x")?;
    let out = space.run_expect(&mut kiln_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "-- out is missing");

    let out = space.run_expect(&mut kiln_command(vec!["--very-verbose", "out"]))?;
    assert_output_contains(&out, "-- out > { in } : already up to date");
    Ok(())
}

#[cfg(unix)]
#[test]
fn output_shown_on_request() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "file in\nexec out: in\n  command = echo $((6*7)); cp %src %dst\n",
    )?;
    space.write("in", "x")?;
    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "echo $((6*7)); cp in out");
    assert_output_not_contains(&out, "42");

    space.age("out", 10)?;
    space.write("in", "y")?;
    let out = space.run_expect(&mut kiln_command(vec!["-w", "out"]))?;
    assert_output_contains(&out, "42\n");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failed_step() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "exec out:\n  command = echo broken; exit 1\n",
    )?;
    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "broken\nfailed: exit status 1\n");
    assert_output_contains(&out, "kiln: error: out: exit status 1");
    Ok(())
}

#[cfg(unix)]
#[test]
fn keep_going() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "exec bad:\n  command = exit 1\nconcat top: bad\ntouch good:\n",
    )?;
    let out = space.run(&mut kiln_command(vec!["-k", "-j", "1", "top", "good"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: exit status 1");
    assert_output_not_contains(&out, "Concating top");
    assert_output_not_contains(&out, "kiln: error");
    assert!(space.exists("good"));
    Ok(())
}
