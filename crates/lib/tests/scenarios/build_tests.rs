use super::common::{Project, concurrent, sequential};

#[tokio::test]
async fn first_build_produces_every_target() {
  let project = Project::c_project();

  let (result, shell) = project.run(&[], &sequential()).await;
  let summary = result.unwrap();

  assert!(summary.configured);
  assert_eq!(summary.targets, vec!["app"]);
  assert_eq!(summary.builders_run, 3);
  assert_eq!(shell.commands().last().unwrap(), "concat app main.o util.o");
  assert_eq!(project.read("app"), "#include \"util.h\"\nmain\nutil\n");
  assert!(project.exists(".use/state.json"));
}

#[tokio::test]
async fn unchanged_project_builds_nothing() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  for _ in 0..2 {
    let (result, shell) = project.run(&[], &sequential()).await;
    let summary = result.unwrap();
    assert!(!summary.configured);
    assert_eq!(summary.builders_run, 0);
    assert!(shell.commands().is_empty());
  }
}

#[tokio::test]
async fn changed_source_rebuilds_its_chain_only() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  project.write("util.c", "util v2\n");
  let (result, shell) = project.run(&[], &sequential()).await;

  assert_eq!(result.unwrap().builders_run, 2);
  assert_eq!(shell.commands(), vec!["concat util.o util.c", "concat app main.o util.o"]);
  assert_eq!(project.read("app"), "#include \"util.h\"\nmain\nutil v2\n");
}

#[tokio::test]
async fn changed_header_rebuilds_including_sources() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  project.write("util.h", "header v2\n");
  let (result, shell) = project.run(&[], &sequential()).await;

  assert_eq!(result.unwrap().builders_run, 2);
  assert_eq!(shell.commands(), vec!["concat main.o main.c", "concat app main.o util.o"]);
}

#[tokio::test]
async fn rewriting_identical_content_rebuilds_nothing() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  project.write("util.c", "util\n");
  let (result, shell) = project.run(&[], &sequential()).await;
  assert_eq!(result.unwrap().builders_run, 0);
  assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn deleted_product_is_rebuilt() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();

  std::fs::remove_file(project.root().join("main.o")).unwrap();
  let (result, shell) = project.run(&[], &sequential()).await;

  result.unwrap();
  assert_eq!(shell.commands()[0], "concat main.o main.c");
  assert!(project.exists("main.o"));
}

#[tokio::test]
async fn named_target_builds_only_its_prerequisites() {
  let project = Project::c_project();

  let (result, shell) = project.run(&["util.o"], &sequential()).await;
  let summary = result.unwrap();

  assert_eq!(summary.targets, vec!["util.o"]);
  assert_eq!(shell.commands(), vec!["concat util.o util.c"]);
  assert!(!project.exists("app"));
}

#[tokio::test]
async fn concurrent_build_matches_sequential() {
  let seq = Project::c_project();
  let con = Project::c_project();

  seq.run(&[], &sequential()).await.0.unwrap();
  let (result, shell) = con.run(&[], &concurrent(4)).await;

  assert_eq!(result.unwrap().builders_run, 3);
  assert_eq!(shell.commands().len(), 3);
  assert_eq!(seq.read("app"), con.read("app"));

  con.write("main.c", "main v2\n");
  let (result, shell) = con.run(&[], &concurrent(4)).await;
  assert_eq!(result.unwrap().builders_run, 2);
  assert_eq!(shell.commands(), vec!["concat main.o main.c", "concat app main.o util.o"]);
}

#[tokio::test]
async fn failed_build_keeps_completed_work() {
  let project = Project::new(
    r#"
    package { name = "cc", search_path = false, command = "concat {product} {sources}", suffix = ".o" }
    package { name = "broken", search_path = false, command = "fail", single = true, target = "app" }
    rule(rule([[.*\.c$]], use("cc")), use("broken"))
    "#,
  );
  project.write("a.c", "a\n");

  let (result, _) = project.run(&[], &sequential()).await;
  assert!(result.is_err());
  assert!(project.exists(".use/state.json"));

  // The object survived the failure and is not rebuilt.
  let (_, shell) = project.run(&["a.o"], &sequential()).await;
  assert!(shell.commands().is_empty());
}

#[tokio::test]
async fn status_reports_without_building() {
  let project = Project::c_project();
  project.run(&[], &sequential()).await.0.unwrap();
  project.write("main.c", "main v2\n");

  let status = project.context().status(&[]).unwrap();
  assert!(!status.needs_configure);
  let stale: Vec<_> = status.out_of_date().map(|t| t.name.as_str()).collect();
  assert_eq!(stale, vec!["app"]);

  let (result, _) = project.run(&[], &sequential()).await;
  assert_eq!(result.unwrap().builders_run, 2);
}
