use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", "")?;
    let out = space.run(&mut kiln_command(vec![]))?;
    assert_eq!(
        std::str::from_utf8(&out.stdout)?,
        "kiln: error: no rule to make all\n"
    );
    assert!(!out.status.success());
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out: in"))?;
    space.write("in", "")?;
    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    assert_output_contains(&out, "touch out");
    assert_output_contains(&out, "kiln: ran 1 jobs, now up to date");

    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "kiln: no work to do");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // Run a job that needs a subdir to be automatically created.
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("subdir/out: in"))?;
    space.write("in", "")?;
    space.run_expect(&mut kiln_command(vec!["subdir/out"]))?;
    assert!(space.read("subdir/out").is_ok());
    Ok(())
}

#[test]
fn defaults_then_all() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        &format!("{}{}phony all: a b\ndefault a\n", touch("a:"), touch("b:")),
    )?;
    space.run_expect(&mut kiln_command(vec![]))?;
    assert!(space.exists("a"));
    assert!(!space.exists("b"));

    space.write(
        "build.kiln",
        &format!("{}{}phony all: a b\n", touch("a:"), touch("b:")),
    )?;
    space.run_expect(&mut kiln_command(vec![]))?;
    assert!(space.exists("b"));
    Ok(())
}

#[test]
fn rebuilds_downstream_of_touched_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        &format!(
            "{}{}phony all: app\n",
            touch("lib.o: lib.c"),
            touch("app: lib.o")
        ),
    )?;
    space.write("lib.c", "")?;
    let out = space.run_expect(&mut kiln_command(vec![]))?;
    assert_output_contains(&out, "kiln: ran 2 jobs");

    space.set_mtime("lib.c", 2_500)?;
    space.set_mtime("lib.o", 2_000)?;
    space.set_mtime("app", 3_000)?;
    let out = space.run_expect(&mut kiln_command(vec![]))?;
    assert_output_contains(&out, "touch lib.o");
    assert_output_contains(&out, "touch app");
    assert_output_contains(&out, "kiln: ran 2 jobs");

    let out = space.run_expect(&mut kiln_command(vec![]))?;
    assert_output_contains(&out, "kiln: no work to do");
    Ok(())
}

#[test]
fn dry_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out: in"))?;
    space.write("in", "")?;
    let out = space.run_expect(&mut kiln_command(vec!["-n", "out"]))?;
    assert_output_contains(&out, "out\n\tin\n\n");
    assert_output_contains(&out, "kiln: dry run, 1 jobs would run");
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn chdir_and_build_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.mkdir("sub")?;
    space.write("sub/other.kiln", &touch("out:"))?;
    space.run_expect(&mut kiln_command(vec!["-C", "sub", "-f", "other.kiln", "out"]))?;
    assert!(space.exists("sub/out"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn variables_and_verbose() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        "greeting = hello
file out: in
  command = echo $greeting > $out
  desc = greet
",
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut kiln_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "echo hello > out");
    assert_output_not_contains(&out, "greet\n");
    assert_eq!(space.read("out")?, b"hello\n");
    Ok(())
}
