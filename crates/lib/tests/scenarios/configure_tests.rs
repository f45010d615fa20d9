use usebuild_lib::context::{BuildError, ContextConfig};
use usebuild_lib::package::Installation;
use usebuild_lib::usetree::UseId;

use super::common::{C_PROJECT, Project, sequential};

/// `gcc` is declared but never installed; `clang` needs nothing.
const OR_PROJECT: &str = r#"
  package { name = "gcc", binaries = { "no-such-gcc" }, search_path = false, command = "fail", suffix = ".o" }
  package { name = "clang", search_path = false, command = "concat {product} {sources}", suffix = ".o" }

  rule([[.*\.c$]], use("gcc") | use("clang"))
"#;

#[tokio::test]
async fn or_falls_back_to_the_installed_alternative() {
  let project = Project::new(OR_PROJECT);
  project.write("main.c", "main\n");

  let mut ctx = project.context();
  ctx.configure().unwrap();

  assert!(ctx.uses().leaf(UseId(0)).unwrap().selected.is_none());
  let clang = ctx.uses().leaf(UseId(1)).unwrap().selected.clone().unwrap();
  assert_eq!(clang.key(), "clang:");
  assert!(ctx.uses().found(UseId(2)));

  let (result, shell) = project.run(&[], &sequential()).await;
  result.unwrap();
  assert_eq!(shell.commands(), vec!["concat main.o main.c"]);
}

#[tokio::test]
async fn or_prefers_the_left_alternative_when_both_exist() {
  let project = Project::new(
    r#"
    package { name = "gcc", search_path = false, command = "concat {product} {sources}", suffix = ".gcc.o" }
    package { name = "clang", search_path = false, command = "concat {product} {sources}", suffix = ".clang.o" }
    rule([[.*\.c$]], use("gcc") | use("clang"))
    "#,
  );
  project.write("main.c", "main\n");

  let (result, _) = project.run(&[], &sequential()).await;
  result.unwrap();
  assert!(project.exists("main.gcc.o"));
  assert!(!project.exists("main.clang.o"));
}

#[tokio::test]
async fn unchanged_script_reuses_configuration() {
  let project = Project::c_project();
  let ctx = project.context();
  assert!(ctx.needs_configure(&[]));

  project.run(&[], &sequential()).await.0.unwrap();

  let ctx = project.context();
  assert!(!ctx.needs_configure(&[]));
  let (result, _) = project.run(&[], &sequential()).await;
  assert!(!result.unwrap().configured);
}

#[tokio::test]
async fn reuse_keeps_the_previous_selection() {
  let project = Project::new(OR_PROJECT);
  project.write("main.c", "main\n");
  project.run(&[], &sequential()).await.0.unwrap();

  let mut ctx = project.context();
  assert!(!ctx.configure_or_reuse(&[]).unwrap());
  let clang = ctx.uses().leaf(UseId(1)).unwrap().selected.clone().unwrap();
  assert_eq!(clang.key(), "clang:");
}

#[tokio::test]
async fn configure_targets_force_configuration() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  let ctx = project.context();
  assert!(ctx.needs_configure(&["configure".to_string()]));
  assert!(ctx.needs_configure(&["reconfigure".to_string()]));

  let mut config = ContextConfig::new(project.root());
  config.reconfigure = true;
  assert!(project.context_with(config).needs_configure(&[]));
}

#[tokio::test]
async fn configure_target_alone_builds_nothing() {
  let project = Project::c_project();

  let (result, shell) = project.run(&["configure"], &sequential()).await;
  let summary = result.unwrap();

  assert!(summary.configured);
  assert!(summary.targets.is_empty());
  assert!(shell.commands().is_empty());
  assert!(project.exists(".use/state.json"));
  assert!(!project.context().needs_configure(&[]));
}

#[tokio::test]
async fn changed_use_options_force_configuration() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  let changed = Project {
    script: C_PROJECT.replace(r#"use("cc")"#, r#"use("cc", { flags = "-O2" })"#),
    temp: project.temp,
  };
  assert!(changed.context().needs_configure(&[]));

  let (result, _) = changed.run(&[], &sequential()).await;
  assert!(result.unwrap().configured);
}

#[tokio::test]
async fn added_rule_forces_configuration() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  let changed = Project {
    script: format!(
      "{}\npackage {{ name = \"cp\", search_path = false, command = \"concat {{product}} {{sources}}\", suffix = \".txt\" }}\nrule([[.*\\.md$]], use(\"cp\"))\n",
      C_PROJECT
    ),
    temp: project.temp,
  };
  assert!(changed.context().needs_configure(&[]));
}

#[tokio::test]
async fn argument_gates_a_rule() {
  let project = Project::new(
    r#"
    package { name = "cc", search_path = false, command = "concat {product} {sources}", suffix = ".o" }
    package { name = "doc", search_path = false, command = "concat {product} {sources}", suffix = ".html" }
    rule([[.*\.c$]], use("cc"))
    rule([[.*\.md$]], use("doc"), nil, argument("docs", false))
    "#,
  );
  project.write("main.c", "main\n");
  project.write("readme.md", "readme\n");

  project.run(&[], &sequential()).await.0.unwrap();
  assert!(project.exists("main.o"));
  assert!(!project.exists("readme.html"));

  let mut config = ContextConfig::new(project.root());
  config.arguments.set("docs", "1");
  let shell = super::common::FakeShell::new();
  let summary = project
    .context_with(config)
    .run(&[], &sequential(), shell.clone())
    .await
    .unwrap();

  // The newly enabled rule has never been resolved.
  assert!(summary.configured);
  assert_eq!(shell.commands(), vec!["concat readme.html readme.md"]);
}

#[tokio::test]
async fn unresolvable_use_names_missing_packages() {
  let project = Project::new(
    r#"
    package { name = "cc", binaries = { "no-such-cc" }, search_path = false, command = "fail" }
    rule([[.*\.c$]], use("cc"))
    "#,
  );
  project.write("main.c", "main\n");

  let (result, _) = project.run(&[], &sequential()).await;
  match result {
    Err(BuildError::Resolution { missing, .. }) => assert_eq!(missing, vec!["cc"]),
    other => panic!("expected a resolution error, got {:?}", other),
  }
}

#[tokio::test]
async fn undeclared_package_is_an_error() {
  let project = Project::new(r#"rule([[.*\.c$]], use("nowhere"))"#);
  project.write("main.c", "main\n");

  let (result, _) = project.run(&[], &sequential()).await;
  assert!(matches!(result, Err(BuildError::UnknownPackage(ref name)) if name == "nowhere"));
}
