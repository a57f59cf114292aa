use super::*;

use std::path::Path;

const FULL_DEF: &str = r#"
name = "ripgrep"
version = "14.1.0"
description = "Recursively search directories for a regex pattern"
homepage = "https://github.com/BurntSushi/ripgrep"
license = "MIT"
provides = ["rg"]

[source]
url = "https://example.test/ripgrep-{{version}}-{{arch}}.tar.gz"
sha256 = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"

[install_paths]
prefix = "/usr/local"

[[install_steps]]
type = "mkdir"
path = "{{datadir}}/doc/{{name}}"

[[install_steps]]
type = "copy"
src = "rg"
dest = "{{bindir}}/rg"
mode = "0755"

[[install_steps]]
type = "symlink"
src = "{{bindir}}/rg"
dest = "{{bindir}}/ripgrep"

[[install_steps]]
type = "run"
command = "echo installed {{name}}@{{version}}"
workdir = "docs"
"#;

#[test]
fn parses_a_complete_definition() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    assert_eq!(def.name, "ripgrep");
    assert_eq!(def.version, "14.1.0");
    assert_eq!(def.provides, vec!["rg"]);
    assert_eq!(def.source.kind(), Some(SourceKind::Url));
    assert_eq!(def.install_steps.len(), 4);
    assert_eq!(def.install_steps[1].action.kind(), "copy");
}

#[test]
fn defaults_fill_paths_and_strip() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    assert_eq!(def.install_paths.bindir, "{{prefix}}/bin");
    assert_eq!(def.install_paths.docdir, "{{datadir}}/doc/{{name}}");
    // Archive sources default to stripping the top-level directory.
    assert_eq!(def.source.strip, Some(1));
}

#[test]
fn expanded_paths_resolve_layered_templates() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    let paths = def.expanded_paths();
    assert_eq!(paths.prefix, "/usr/local");
    assert_eq!(paths.bindir, "/usr/local/bin");
    assert_eq!(paths.datadir, "/usr/local/share");
    assert_eq!(paths.mandir, "/usr/local/share/man");
    assert_eq!(paths.docdir, "/usr/local/share/doc/ripgrep");
}

#[test]
fn expanded_source_substitutes_variables() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    let source = def.expanded_source();
    let url = source.url.expect("must have url");
    assert!(url.starts_with("https://example.test/ripgrep-14.1.0-"));
    assert!(!url.contains("{{"));
}

#[test]
fn expanded_steps_substitute_variables() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    let steps = def.expanded_steps(Path::new("/tmp/src"));
    assert_eq!(steps.len(), 4);

    match &steps[1].action {
        StepAction::Copy { src, dest, mode } => {
            assert_eq!(src, "rg");
            assert_eq!(dest, "/usr/local/bin/rg");
            assert_eq!(mode.as_deref(), Some("0755"));
        }
        other => panic!("expected copy step, got {other:?}"),
    }
    match &steps[3].action {
        StepAction::Run { command, workdir } => {
            assert_eq!(command, "echo installed ripgrep@14.1.0");
            assert_eq!(workdir.as_deref(), Some("docs"));
        }
        other => panic!("expected run step, got {other:?}"),
    }
}

#[test]
fn platform_filtering_drops_foreign_steps() {
    let def = PackageDef::from_toml_str(&format!(
        r#"
name = "tool"
version = "1.0.0"

[source]
git = "https://example.test/tool.git"

[[install_steps]]
type = "run"
command = "make install"
platforms = ["{}"]

[[install_steps]]
type = "run"
command = "true"
platforms = ["plan9-mips"]
"#,
        host_platform()
    ))
    .expect("must parse");

    let steps = def.expanded_steps(Path::new("/tmp/src"));
    assert_eq!(steps.len(), 1);
    match &steps[0].action {
        StepAction::Run { command, .. } => assert_eq!(command, "make install"),
        other => panic!("expected run step, got {other:?}"),
    }
}

#[test]
fn source_requires_exactly_one_kind() {
    let none = r#"
name = "tool"
version = "1.0.0"

[source]
sha256 = "ab"

[[install_steps]]
type = "run"
command = "true"
"#;
    let err = PackageDef::from_toml_str(none).expect_err("must reject missing source");
    assert!(err.to_string().contains("source is required"));

    let both = r#"
name = "tool"
version = "1.0.0"

[source]
url = "https://example.test/t.tar.gz"
git = "https://example.test/t.git"
sha256 = "ab"

[[install_steps]]
type = "run"
command = "true"
"#;
    let err = PackageDef::from_toml_str(both).expect_err("must reject ambiguous source");
    assert!(err.to_string().contains("only one source type"));
}

#[test]
fn url_sources_require_a_checksum() {
    let raw = r#"
name = "tool"
version = "1.0.0"

[source]
url = "https://example.test/t.tar.gz"

[[install_steps]]
type = "run"
command = "true"
"#;
    let err = PackageDef::from_toml_str(raw).expect_err("must require sha256");
    assert!(err.to_string().contains("sha256"));
}

#[test]
fn git_sources_do_not_require_a_checksum() {
    let raw = r#"
name = "tool"
version = "1.0.0"

[source]
git = "https://example.test/t.git"
ref = "v1.0.0"

[[install_steps]]
type = "run"
command = "make install"
"#;
    let def = PackageDef::from_toml_str(raw).expect("must parse");
    assert_eq!(def.source.kind(), Some(SourceKind::Git));
    assert_eq!(def.source.git_ref.as_deref(), Some("v1.0.0"));
    // Git sources keep the tree as cloned.
    assert_eq!(def.source.strip, None);
}

#[test]
fn at_least_one_step_is_required() {
    let raw = r#"
name = "tool"
version = "1.0.0"

[source]
git = "https://example.test/t.git"
"#;
    let err = PackageDef::from_toml_str(raw).expect_err("must require steps");
    assert!(err.to_string().contains("at least one install step"));
}

#[test]
fn step_validation_names_the_offending_index() {
    let raw = r#"
name = "tool"
version = "1.0.0"

[source]
git = "https://example.test/t.git"

[[install_steps]]
type = "run"
command = "true"

[[install_steps]]
type = "copy"
src = ""
dest = "/usr/local/bin/tool"
"#;
    let err = PackageDef::from_toml_str(raw).expect_err("must reject empty src");
    assert!(format!("{err:#}").contains("install_steps[1]"));
}

#[test]
fn unknown_step_types_fail_to_parse() {
    let raw = r#"
name = "tool"
version = "1.0.0"

[source]
git = "https://example.test/t.git"

[[install_steps]]
type = "chmod"
path = "/usr/local/bin/tool"
"#;
    assert!(PackageDef::from_toml_str(raw).is_err());
}

#[test]
fn source_location_prefers_the_set_field() {
    let def = PackageDef::from_toml_str(FULL_DEF).expect("must parse");
    assert!(def.source.location().starts_with("https://example.test/"));

    let empty = Source::default();
    assert_eq!(empty.location(), "");
    assert_eq!(empty.kind(), None);
}
