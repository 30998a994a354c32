use std::path::Path;

use laze::generator::{self, GenerateOptions, Stats};

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn generate(root: &Path) -> (String, Stats) {
    generate_with(root, GenerateOptions::default())
}

fn generate_with(root: &Path, mut opts: GenerateOptions) -> (String, Stats) {
    opts.project_root = root.to_path_buf();
    let mut out = Vec::new();
    let stats = generator::generate(&opts, &mut out).unwrap();
    (String::from_utf8(out).unwrap(), stats)
}

const PRELUDE: &str = r#"
context:
  name: default
builder:
  name: native
  parent: default
rule:
  - name: CC
    in: .c
    out: o
    cmd: "gcc ${CFLAGS} -c ${in} -o ${out}"
  - name: LINK
    out: elf
    cmd: "gcc ${LDFLAGS} ${in} -o ${out}"
  - name: SYMLINK
    cmd: "ln -sf ${in} ${out}"
"#;

#[test]
fn test_single_app_single_builder() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!("{}app:\n  name: app1\n  sources: [main.c]\n", PRELUDE),
    );
    let (ninja, stats) = generate(tmp.path());

    assert_eq!(stats.apps_configured, 1);
    assert!(ninja.contains("build build/native/app1/main.o: CC main.c\n"));
    assert!(ninja.contains("build build/native/app1/app1.elf: LINK build/native/app1/main.o\n"));
    assert_eq!(ninja.matches("rule relaze\n").count(), 1);
    assert_eq!(ninja.matches("build build.ninja: relaze").count(), 1);
    // Every loaded file is an implicit input of the regeneration entry.
    assert!(ninja.contains("build build.ninja: relaze laze.yml | laze.yml\n"));
}

#[test]
fn test_optional_dependency_present_and_absent() {
    let with_optional = format!(
        "{}module:\n  name: optional\napp:\n  name: core\n  depends: [\"?optional\"]\n  sources: [main.c]\n",
        PRELUDE
    );
    let without_optional = format!(
        "{}app:\n  name: core\n  depends: [\"?optional\"]\n  sources: [main.c]\n",
        PRELUDE
    );

    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &with_optional);
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("-DMODULE_OPTIONAL"));

    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &without_optional);
    let (ninja, stats) = generate(tmp.path());
    assert_eq!(stats.apps_configured, 1);
    assert!(!ninja.contains("-DMODULE_OPTIONAL"));
}

#[test]
fn test_missing_hard_dependency_skips_builder() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}---\nbuilder:\n  name: esp32\n  parent: default\napp:\n  name: core\n  depends: [missing]\n  sources: [main.c]\n",
            PRELUDE
        ),
    );
    let (ninja, stats) = generate(tmp.path());

    // Both builders are skipped with a warning; the run itself succeeds.
    assert_eq!(stats.apps_configured, 0);
    assert!(!ninja.contains(".elf"));
}

#[test]
fn test_template_expansion_produces_one_app_per_value() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &format!("{}subdirs: [apps]\n", PRELUDE));
    write(
        tmp.path(),
        "apps/laze.yml",
        "template:\n  '@NAME@': [alpha, beta, gamma]\napp:\n  name: '@NAME@'\n  sources: [main.c]\n",
    );
    let (ninja, stats) = generate(tmp.path());

    assert_eq!(stats.apps_configured, 3);
    for name in ["alpha", "beta", "gamma"] {
        assert!(ninja.contains(&format!("build/native/{}/{}.elf", name, name)));
    }
}

#[test]
fn test_identical_link_inputs_alias_via_symlink() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}app:\n  - name: x\n    sources: [main.c]\n  - name: y\n    sources: [main.c]\n",
            PRELUDE
        ),
    );
    let (ninja, stats) = generate(tmp.path());

    assert_eq!(stats.apps_configured, 2);
    // One compile and one link; the second app aliases the first artifact.
    assert_eq!(ninja.matches(": CC ").count(), 1);
    assert_eq!(ninja.matches(": LINK ").count(), 1);
    assert!(ninja.contains("build build/native/y/y.elf: SYMLINK build/native/x/x.elf\n"));
    assert!(stats.actions_cached >= 2);
}

#[test]
fn test_variable_cascade_union_and_module_append() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        concat!(
            "context:\n  name: default\n  vars:\n    CFLAGS: [-O2]\n",
            "builder:\n  name: native\n  parent: default\n  vars:\n    CFLAGS: [-Os]\n",
            "rule:\n",
            "  - name: CC\n    in: .c\n    out: o\n    cmd: \"gcc ${CFLAGS} -c ${in} -o ${out}\"\n",
            "  - name: LINK\n    out: elf\n    cmd: \"gcc ${in} -o ${out}\"\n",
            "  - name: SYMLINK\n    cmd: \"ln -sf ${in} ${out}\"\n",
            "app:\n  name: app1\n  sources: [main.c]\n  vars:\n    CFLAGS: [-g]\n",
        ),
    );
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("  CFLAGS = -O2 -Os -g\n"));
}

#[test]
fn test_sigil_ordering_in_emitted_vars() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}app:\n  name: app1\n  sources: [main.c]\n  vars:\n    CFLAGS: [b, '>z', '<a']\n",
            PRELUDE
        ),
    );
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("  CFLAGS = a b z\n"));
}

#[test]
fn test_defines_for_dependencies() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}module:\n  name: shell-cmds\napp:\n  name: app1\n  depends: [shell-cmds]\n  uses: [shell-cmds]\n  sources: [main.c]\n",
            PRELUDE
        ),
    );
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("-DMODULE_SHELL_CMDS"));
}

#[test]
fn test_export_vars_reach_dependent_compiles() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &format!("{}subdirs: [lib]\n", PRELUDE));
    write(
        tmp.path(),
        "lib/laze.yml",
        concat!(
            "module:\n  name: lib\n  sources: [lib.c]\n",
            "  export_vars:\n    CFLAGS: [\"-I${source_folder}/include\"]\n",
            "---\n",
            "app:\n  name: app1\n  context: default\n  depends: [lib]\n  sources: [main.c]\n",
        ),
    );
    let (ninja, _) = generate(tmp.path());
    // The library's exported include path shows up on the app's compile.
    assert!(ninja.contains("-Ilib/include"));
    assert!(ninja.contains("build build/native/app1/lib/lib.o: CC lib/lib.c\n"));
}

#[test]
fn test_conditional_sources_gate_on_module_set() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}module:\n  name: periph\napp:\n  name: app1\n  depends: [periph]\n  sources:\n    - main.c\n    - periph: extra.c\n    - absent: never.c\n",
            PRELUDE
        ),
    );
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("build build/native/app1/main.o: CC main.c\n"));
    assert!(ninja.contains("build build/native/app1/extra.o: CC extra.c\n"));
    assert!(!ninja.contains("never.o"));
}

#[test]
fn test_whitelist_and_blacklist_filter_builders() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            concat!(
                "{}---\nbuilder:\n  name: esp32\n  parent: default\n",
                "app:\n",
                "  - name: only-native\n    whitelist: [native]\n    sources: [main.c]\n",
                "  - name: not-esp\n    blacklist: [esp32]\n    sources: [main.c]\n",
            ),
            PRELUDE
        ),
    );
    let (ninja, stats) = generate(tmp.path());

    assert_eq!(stats.apps_configured, 2);
    assert!(ninja.contains("build/native/only-native/only-native.elf"));
    assert!(!ninja.contains("build/esp32/only-native"));
    assert!(ninja.contains("build/native/not-esp/not-esp.elf"));
    assert!(!ninja.contains("build/esp32/not-esp"));
}

#[test]
fn test_app_filter_limits_configuration() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}app:\n  - name: one\n    sources: [a.c]\n  - name: two\n    sources: [b.c]\n",
            PRELUDE
        ),
    );
    let (ninja, stats) = generate_with(
        tmp.path(),
        GenerateOptions {
            apps: vec!["one".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(stats.apps_configured, 1);
    assert!(ninja.contains("one.elf"));
    assert!(!ninja.contains("two.elf"));
}

#[test]
fn test_phony_aggregation_targets() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!("{}app:\n  name: app1\n  sources: [main.c]\n", PRELUDE),
    );
    let (ninja, _) = generate(tmp.path());

    // Builder and app aggregation nodes, plus the context-tree edge.
    assert!(ninja.contains("build native: phony build/native/app1/app1.elf\n"));
    assert!(ninja.contains("build app1: phony build/native/app1/app1.elf\n"));
    assert!(ninja.contains("build default: phony native\n"));
}

#[test]
fn test_deterministic_emission() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &format!("{}subdirs: [sub]\n", PRELUDE));
    write(
        tmp.path(),
        "sub/laze.yml",
        "module:\n  name: lib\n  sources: [lib.c]\n---\napp:\n  name: app1\n  depends: [lib]\n  sources: [main.c]\n",
    );
    let (first, _) = generate(tmp.path());
    let (second, _) = generate(tmp.path());
    assert_eq!(first, second);
}

#[test]
fn test_sidecar_files_written_sorted() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}app:\n  name: app1\n  sources: [main.c]\n  tools:\n    flash:\n      cmd: \"flasher ${{out}}\"\n",
            PRELUDE
        ),
    );
    generate(tmp.path());

    let build_dir = tmp.path().join("build");
    let args: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(build_dir.join("laze-args")).unwrap())
            .unwrap();
    assert_eq!(args["project_file"], "laze.yml");

    let per_folder: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(build_dir.join("laze-app-per-folder")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        per_folder[""]["app1"]["native"],
        "build/native/app1/app1.elf"
    );

    let tools: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(build_dir.join("laze-tools")).unwrap())
            .unwrap();
    assert_eq!(
        tools["build/native/app1/app1.elf"]["flash"]["cmd"][0],
        "flasher build/native/app1/app1.elf"
    );
}

#[test]
fn test_module_vars_in_subdir_modules() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &format!("{}subdirs: [drivers]\n", PRELUDE));
    write(
        tmp.path(),
        "drivers/laze.yml",
        "module:\n  sources: [drv.c]\n---\napp:\n  name: app1\n  depends: [drivers]\n  sources: [main.c]\n",
    );
    let (ninja, stats) = generate(tmp.path());

    // The nameless module takes its folder as name; sources resolve
    // relative to it and objects keep the module path.
    assert_eq!(stats.apps_configured, 1);
    assert!(ninja.contains("build build/native/app1/drivers/drv.o: CC drivers/drv.c\n"));
}

#[test]
fn test_import_with_folder_override_loads_modules() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}import:\n  - pkgs:\n      folder_override: vendor/pkgs\napp:\n  name: app1\n  depends: [imported]\n  sources: [main.c]\n",
            PRELUDE
        ),
    );
    write(
        tmp.path(),
        "vendor/pkgs/laze.yml",
        "module:\n  name: imported\n  sources: [lib.c]\n",
    );
    let (ninja, stats) = generate(tmp.path());

    assert_eq!(stats.apps_configured, 1);
    // The imported module's sources resolve inside the import folder.
    assert!(ninja.contains(
        "build build/native/app1/vendor/pkgs/lib.o: CC vendor/pkgs/lib.c\n"
    ));
    // Imported project files regenerate the manifest too.
    assert!(ninja.contains("vendor/pkgs/laze.yml"));
}

#[test]
fn test_module_download_overrides_source_location() {
    let tmp = tempfile::tempdir().unwrap();
    // A pre-populated download target is reused as-is.
    std::fs::create_dir_all(tmp.path().join(".laze/dl/periph/.git")).unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!(
            "{}module:\n  name: periph\n  sources: [periph.c]\n  download:\n    git:\n      url: https://example.com/periph.git\napp:\n  name: app1\n  depends: [periph]\n  sources: [main.c]\n",
            PRELUDE
        ),
    );
    let (ninja, _) = generate(tmp.path());
    assert!(ninja.contains("build build/native/app1/periph.o: CC .laze/dl/periph/periph.c\n"));
}

#[test]
fn test_unknown_entity_field_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    write(
        tmp.path(),
        "laze.yml",
        &format!("{}app:\n  name: app1\n  surces: [main.c]\n", PRELUDE),
    );
    let mut out = Vec::new();
    let opts = GenerateOptions {
        project_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let err = generator::generate(&opts, &mut out).unwrap_err();
    assert!(err.to_string().contains("parse error"));
}

#[test]
fn test_unknown_top_level_key_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "laze.yml", &format!("{}bogus: 1\n", PRELUDE));
    let mut out = Vec::new();
    let opts = GenerateOptions {
        project_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let err = generator::generate(&opts, &mut out).unwrap_err();
    assert!(err.to_string().contains("unknown top-level key"));
}
