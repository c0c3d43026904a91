//! Dependencies discovered from depfiles.

use crate::e2e::*;

#[cfg(unix)]
const PIPELINE: &str = "
file a.c a.h
depend a.d: a.c
  command = printf 'a.o: a.c \\\\\\n  a.h\\n' > %dst
compile a.o: a.d
  command = cat a.h a.c > %dst
";

#[cfg(unix)]
#[test]
fn header_change_recompiles() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("kiln.rules", PIPELINE)?;
    space.write("a.c", "int a;\n")?;
    space.write("a.h", "#define A\n")?;

    let out = space.run_expect(&mut kiln_command(vec!["a.o"]))?;
    assert_output_contains(&out, "Depending a.d");
    assert_output_contains(&out, "Compiling a.o");
    assert_eq!(space.read("a.o")?, b"#define A\nint a;\n");

    let out = space.run_expect(&mut kiln_command(vec!["a.o"]))?;
    assert_output_contains(&out, "kiln: no work to do");

    space.age("a.o", 10)?;
    space.write("a.h", "#define B\n")?;
    let out = space.run_expect(&mut kiln_command(vec!["a.o"]))?;
    assert_output_not_contains(&out, "Depending a.d");
    assert_output_contains(&out, "Compiling a.o");
    assert_eq!(space.read("a.o")?, b"#define B\nint a;\n");
    Ok(())
}

/// depfile contains invalid syntax.
#[test]
fn bad_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "file a.d\ncompile a.o: a.d\n  command = never run\n",
    )?;
    space.write("a.d", "garbage text\n")?;
    let out = space.run(&mut kiln_command(vec!["a.o"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "parse error:");
    assert_output_not_contains(&out, "Compiling");
    Ok(())
}

/// depfile names a file on disk that the catalog never declared.
#[test]
fn undeclared_header() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "file a.d\ncompile a.o: a.d\n  command = never run\n",
    )?;
    space.write("a.d", "a.o: a.c stray.h\n")?;
    space.write("stray.h", "")?;
    let out = space.run(&mut kiln_command(vec!["a.o"]))?;
    assert!(!out.status.success());
    assert_output_contains(
        &out,
        "stray.h (needed by a.o) is present but the catalog does not declare it",
    );
    Ok(())
}

/// Missing depfiles are expected in a dry run: nothing produced them.
#[test]
fn dry_run_without_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "kiln.rules",
        "file a.c\ndepend a.d: a.c\n  command = make-deps\ncompile a.o: a.d\n  command = compile\n",
    )?;
    space.write("a.c", "int a;\n")?;
    let out = space.run_expect(&mut kiln_command(vec!["-n", "a.o"]))?;
    assert_output_contains(&out, "Depending a.d");
    assert_output_contains(&out, "Compiling a.o");
    Ok(())
}
