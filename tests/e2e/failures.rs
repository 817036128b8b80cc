use crate::e2e::*;

#[cfg(unix)]
#[test]
fn failed_command_removes_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        "file out:
  command = echo partial > $out; echo oops; exit 1
  desc = write out
",
    )?;
    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: write out\noops\n");
    assert_output_contains(&out, "kiln: error: command failed: write out");
    assert!(!space.exists("out"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn keep_going() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        &format!(
            "file bad:
  command = exit 1
  desc = bad
{}phony all: bad good
",
            touch("good:")
        ),
    )?;
    let out = space.run(&mut kiln_command(vec!["-k"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: bad");
    assert_output_contains(&out, "kiln: error: command failed: bad\n  targets: bad\n");
    assert_output_contains(&out, "kiln: error: execution failed");
    assert!(space.exists("good"));

    Ok(())
}

#[cfg(unix)]
#[test]
fn failure_stops_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.kiln",
        &format!(
            "file bad:
  command = exit 1
  desc = bad
{}",
            touch("good: bad")
        ),
    )?;
    let out = space.run(&mut kiln_command(vec!["good"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: bad\nexit status 1\n");
    assert_output_not_contains(&out, "touch good");
    assert!(!space.exists("good"));
    Ok(())
}

#[test]
fn bad_jobs_flag() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &touch("out:"))?;
    let out = space.run(&mut kiln_command(vec!["-j", "0", "out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln: error: jobs must be > 0");
    Ok(())
}

#[test]
fn parse_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", "file :\n")?;
    let out = space.run(&mut kiln_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "kiln: error: parse error: expected target\n");
    assert_output_contains(&out, "build.kiln:1: file :\n");
    Ok(())
}

#[test]
fn duplicate_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.kiln", &format!("{}{}", touch("out:"), touch("out:")))?;
    let out = space.run(&mut kiln_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "multiple rules generate out");
    Ok(())
}
