use crate::e2e::*;

const BUILD: &str = "file lib.o: lib.c
  command = cc -c lib.c
  desc = compile lib
phony all: lib.o
";

#[test]
fn descriptions() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", BUILD)?;
    let out = space.run_expect(&mut kiln_command(vec!["-D"]))?;
    assert_eq!(std::str::from_utf8(&out.stdout)?, "all\nlib.o\n\tcompile lib\n");
    Ok(())
}

#[test]
fn dependencies() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", BUILD)?;
    let out = space.run_expect(&mut kiln_command(vec!["-P"]))?;
    assert_eq!(
        std::str::from_utf8(&out.stdout)?,
        "all\n\tlib.o\n\nlib.o\n\tlib.c\n\n"
    );
    // Nothing was built.
    assert!(!space.exists("lib.o"));
    Ok(())
}

#[test]
fn json() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", BUILD)?;
    let out = space.run_expect(&mut kiln_command(vec!["-J"]))?;
    let value: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(
        value,
        serde_json::json!([
            {"deps": ["lib.o"], "targets": ["all"]},
            {"deps": ["lib.c"], "targets": ["lib.o"]},
        ])
    );
    Ok(())
}

#[test]
fn dot() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", BUILD)?;
    let out = space.run_expect(&mut kiln_command(vec!["-Q"]))?;
    let out = std::str::from_utf8(&out.stdout)?;
    assert!(out.starts_with("digraph G{\n"));
    assert!(out.contains("[label=\"lib.c\"]\n"));
    assert!(out.ends_with("}\n"));
    Ok(())
}

#[test]
fn debug_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", BUILD)?;
    let out = space.run(&mut kiln_command(vec!["-d", "list"]))?;
    assert_output_contains(&out, "trace");
    Ok(())
}
