use crate::e2e::*;

#[test]
fn missing_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out: in"))?;
    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "kiln: error: no rule to make in, needed by out");
    assert!(!out.status.success());
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn missing_output_is_rebuilt() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out: in"))?;
    space.write("in", "")?;
    space.run_expect(&mut kiln_command(vec!["out"]))?;
    std::fs::remove_file(space.path().join("out"))?;

    let out = space.run_expect(&mut kiln_command(vec!["out"]))?;
    assert_output_contains(&out, "kiln: ran 1 jobs");
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        &format!("{}{}", touch("a: b"), touch("b: a")),
    )?;
    let out = space.run(&mut kiln_command(vec!["a"]))?;
    assert_output_contains(&out, "circular dependency detected: a -> b -> a");
    assert!(!out.status.success());
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out:"))?;
    let out = space.run(&mut kiln_command(vec!["nope"]))?;
    assert_eq!(
        std::str::from_utf8(&out.stdout)?,
        "kiln: error: no rule to make nope\n"
    );
    Ok(())
}
