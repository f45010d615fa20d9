use usebuild_lib::context::BuildError;
use usebuild_lib::usetree::UseId;

use super::common::Project;

/// `a` and `b` always resolve; `missing` never does.
fn algebra(expr: &str) -> Project {
  let project = Project::new(&format!(
    r#"
    package {{ name = "a", search_path = false, flags = "-a" }}
    package {{ name = "b", search_path = false, flags = "-b" }}
    package {{ name = "missing", binaries = {{ "no-such-tool" }}, search_path = false }}
    rule("x", {})
    "#,
    expr
  ));
  project.write("x", "x\n");
  project
}

#[test]
fn add_requires_both_operands() {
  let mut ctx = algebra(r#"use("a") + use("b")"#).context();
  ctx.configure().unwrap();
  assert!(ctx.uses().found(UseId(2)));

  let mut ctx = algebra(r#"use("a") + use("missing")"#).context();
  match ctx.configure() {
    Err(BuildError::Resolution { missing, root }) => {
      assert_eq!(missing, vec!["missing"]);
      assert_eq!(root, "a + missing");
    }
    other => panic!("expected a resolution error, got {:?}", other),
  }
}

#[test]
fn and_is_satisfied_by_either_operand() {
  let mut ctx = algebra(r#"use("missing") & use("b")"#).context();
  ctx.configure().unwrap();

  assert!(!ctx.uses().found(UseId(0)));
  assert!(ctx.uses().found(UseId(1)));
  assert!(ctx.uses().found(UseId(2)));
}

#[test]
fn or_fails_only_when_both_operands_fail() {
  let mut ctx = algebra(r#"use("missing") | use("a")"#).context();
  ctx.configure().unwrap();
  assert!(ctx.uses().found(UseId(2)));

  let mut ctx = algebra(r#"use("missing") | use("missing")"#).context();
  assert!(matches!(ctx.configure(), Err(BuildError::Resolution { .. })));
}

#[test]
fn nested_groups_resolve_bottom_up() {
  let mut ctx = algebra(r#"(use("missing") | use("a")) + (use("b") & use("missing"))"#).context();
  ctx.configure().unwrap();

  let described = ctx.uses().describe(UseId(6));
  assert_eq!(described, "(missing | a) + (b & missing)");
  assert!(ctx.uses().found(UseId(6)));
}

#[test]
fn disabled_leaf_counts_as_not_found() {
  let mut ctx = algebra(r#"use("a", nil, false) | use("b")"#).context();
  ctx.configure().unwrap();

  assert!(!ctx.uses().found(UseId(0)));
  assert!(ctx.uses().leaf(UseId(0)).unwrap().selected.is_none());
  assert!(ctx.uses().found(UseId(2)));

  let mut ctx = algebra(r#"use("a", nil, arg("never")) + use("b")"#).context();
  assert!(matches!(ctx.configure(), Err(BuildError::Resolution { .. })));
}

#[test]
fn a_shared_use_keeps_one_selection() {
  let project = Project::new(
    r#"
    package { name = "a", search_path = false, flags = "-a" }
    local a = use("a")
    rule("x", a)
    rule("y", a + a)
    "#,
  );
  let mut ctx = project.context();
  ctx.configure().unwrap();

  assert!(ctx.uses().found(UseId(0)));
  assert!(ctx.uses().found(UseId(1)));
  assert_eq!(ctx.uses().get(UseId(0)).parents(), &[UseId(1)]);
}
