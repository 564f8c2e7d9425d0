use proptest::prelude::*;
use strata_core::{Error, Manifest, Requirement, normalize_name};
use tempfile::TempDir;

// ── Parsing ──

#[test]
fn parses_pinned_requirement() {
    let manifest = Manifest::parse("flask==3.0.0\n").unwrap();

    assert_eq!(manifest.requirements.len(), 1);
    let req = &manifest.requirements[0];
    assert_eq!(req.name, "flask");
    assert_eq!(req.constraint.as_deref(), Some("==3.0.0"));
    assert!(req.extras.is_empty());
    assert!(req.marker.is_none());
    assert_eq!(req.line, 1);
}

#[test]
fn preserves_entry_order() {
    let content = "pandas==2.2.0\nnumpy>=1.26\ndash\nplotly==5.18.0\n";
    let manifest = Manifest::parse(content).unwrap();

    let names: Vec<_> = manifest
        .requirements
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["pandas", "numpy", "dash", "plotly"]);
}

#[test]
fn skips_blank_lines_and_comments() {
    let content = "# web\n\nflask==3.0.0  # pinned\n   \n# end\n";
    let manifest = Manifest::parse(content).unwrap();

    assert_eq!(manifest.requirements.len(), 1);
    assert_eq!(manifest.requirements[0].constraint.as_deref(), Some("==3.0.0"));
    assert_eq!(manifest.requirements[0].line, 3);
}

#[test]
fn keeps_installer_options_in_order() {
    let content = "--index-url https://pypi.example/simple\nflask\n-c constraints.txt\n";
    let manifest = Manifest::parse(content).unwrap();

    assert_eq!(
        manifest.options,
        vec![
            "--index-url https://pypi.example/simple",
            "-c constraints.txt"
        ]
    );
    assert_eq!(manifest.requirements.len(), 1);
}

#[test]
fn parses_extras_constraint_and_marker() {
    let req = Requirement::parse("uvicorn[standard, watch] >=0.29 ; sys_platform != 'win32'", 7)
        .unwrap();

    assert_eq!(req.name, "uvicorn");
    assert_eq!(req.extras, vec!["standard", "watch"]);
    assert_eq!(req.constraint.as_deref(), Some(">=0.29"));
    assert_eq!(req.marker.as_deref(), Some("sys_platform != 'win32'"));
    assert_eq!(req.line, 7);
}

#[test]
fn parses_direct_url_reference() {
    let req = Requirement::parse("mypkg @ https://example.com/mypkg-1.0.tar.gz#sha256=abc", 1)
        .unwrap();

    assert_eq!(req.name, "mypkg");
    assert!(req.constraint.unwrap().starts_with("@ https://"));
}

#[test]
fn rejects_invalid_name_with_line_number() {
    let content = "flask==3.0.0\n!!broken\n";
    let err = Manifest::parse(content).unwrap_err();

    match err {
        Error::ManifestParse { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn rejects_unterminated_extras() {
    let err = Requirement::parse("flask[async", 1).unwrap_err();
    assert!(err.to_string().contains("unterminated extras"));
}

#[test]
fn rejects_garbage_after_name() {
    let err = Requirement::parse("flask three", 4).unwrap_err();
    assert!(err.to_string().contains("line 4"));
}

#[test]
fn empty_manifest_is_valid() {
    let manifest = Manifest::parse("# nothing yet\n").unwrap();
    assert!(manifest.is_empty());
}

// ── Lookup / normalisation ──

#[test]
fn find_compares_normalized_names() {
    let manifest = Manifest::parse("Typing_Extensions==4.9.0\n").unwrap();

    assert!(manifest.find("typing-extensions").is_some());
    assert!(manifest.find("TYPING.extensions").is_some());
    assert!(manifest.find("typing").is_none());
}

#[test]
fn normalize_collapses_separator_runs() {
    assert_eq!(normalize_name("Foo__Bar-.baz"), "foo-bar-baz");
    assert_eq!(normalize_name("doesnotexist-pkg"), "doesnotexist-pkg");
}

// ── Loading / digest ──

#[test]
fn load_reads_file_and_keeps_raw_bytes() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("requirements.txt");
    std::fs::write(&path, "flask==3.0.0\n").unwrap();

    let manifest = Manifest::load(&path).unwrap();

    assert_eq!(manifest.path, path);
    assert_eq!(manifest.raw(), b"flask==3.0.0\n");
}

#[test]
fn load_missing_file_is_read_error() {
    let tmp = TempDir::new().unwrap();
    let err = Manifest::load(&tmp.path().join("requirements.txt")).unwrap_err();

    assert!(matches!(err, Error::ManifestRead { .. }));
}

#[test]
fn file_references_lists_options_naming_other_files() {
    let content = "\
--index-url https://pypi.example/simple
-r base.txt
--constraint=constraints.txt
-cpins.txt
--extra-index-url https://mirror.example/simple
flask
";
    let manifest = Manifest::parse(content).unwrap();

    assert_eq!(
        manifest.file_references(),
        vec!["-r base.txt", "--constraint=constraints.txt", "-cpins.txt"]
    );
}

#[test]
fn plain_manifest_has_no_file_references() {
    let manifest = Manifest::parse("--index-url https://pypi.example/simple\nflask\n").unwrap();
    assert!(manifest.file_references().is_empty());
}

proptest! {
    #[test]
    fn normalize_is_idempotent(name in "[A-Za-z0-9][A-Za-z0-9._-]{0,20}[A-Za-z0-9]") {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once.clone());
        prop_assert!(!once.contains("--"));
    }

    #[test]
    fn valid_pins_always_parse(
        name in "[a-z][a-z0-9_-]{0,15}[a-z0-9]",
        major in 0u32..50,
        minor in 0u32..50,
    ) {
        let line = format!("{name}=={major}.{minor}");
        let req = Requirement::parse(&line, 1).unwrap();
        prop_assert_eq!(req.name, name);
        prop_assert_eq!(req.constraint, Some(format!("=={major}.{minor}")));
    }
}
