use std::path::PathBuf;

use strata_core::{AppRef, Digest, Error, ImageConfig, ImageRecord, LayerKind, LayerRef};
use tempfile::TempDir;

fn config() -> ImageConfig {
    ImageConfig {
        workdir: "app".to_owned(),
        env_dir: "env".to_owned(),
        bind: "0.0.0.0:8080".to_owned(),
        app: "app:server".to_owned(),
        process_manager: "gunicorn".to_owned(),
        workers: None,
    }
}

fn layers() -> Vec<LayerRef> {
    LayerKind::ALL
        .iter()
        .map(|kind| LayerRef {
            kind: *kind,
            key: Digest::of_bytes(kind.as_str().as_bytes()),
        })
        .collect()
}

// ── AppRef ──

#[test]
fn app_ref_parses_dotted_module() {
    let app: AppRef = "web.wsgi:application".parse().unwrap();

    assert_eq!(app.module, "web.wsgi");
    assert_eq!(app.object, "application");
    assert_eq!(app.to_string(), "web.wsgi:application");
}

#[test]
fn app_ref_rejects_missing_colon() {
    let err = "app".parse::<AppRef>().unwrap_err();
    assert!(err.to_string().contains("missing ':'"));
}

#[test]
fn app_ref_rejects_empty_parts() {
    assert!(":server".parse::<AppRef>().is_err());
    assert!("app:".parse::<AppRef>().is_err());
}

#[test]
fn app_ref_rejects_invalid_identifiers() {
    assert!("my-app:server".parse::<AppRef>().is_err());
    assert!("app:1server".parse::<AppRef>().is_err());
    assert!("app..web:server".parse::<AppRef>().is_err());
    assert!(matches!(
        "app:server()".parse::<AppRef>(),
        Err(Error::InvalidAppRef { .. })
    ));
}

#[test]
fn app_ref_module_candidates() {
    let app: AppRef = "web.wsgi:application".parse().unwrap();

    assert_eq!(
        app.module_candidates(),
        vec![
            PathBuf::from("web/wsgi.py"),
            PathBuf::from("web/wsgi/__init__.py")
        ]
    );
}

// ── Digest ──

#[test]
fn digest_has_sha256_prefix() {
    let digest = Digest::of_bytes(b"hello");

    assert!(digest.as_str().starts_with("sha256:"));
    assert_eq!(digest.hex().len(), 64);
    assert_eq!(digest.short().len(), 12);
}

#[test]
fn digest_new_adds_prefix_once() {
    assert_eq!(Digest::new("abc").as_str(), "sha256:abc");
    assert_eq!(Digest::new("sha256:abc").as_str(), "sha256:abc");
}

#[test]
fn digest_builder_frames_fields() {
    let mut a = strata_core::DigestBuilder::new("test");
    a.str("ab").str("c");
    let mut b = strata_core::DigestBuilder::new("test");
    b.str("a").str("bc");

    assert_ne!(a.finish(), b.finish());
}

// ── ImageRecord ──

#[test]
fn image_id_is_pure_function_of_layers_and_config() {
    let a = ImageRecord::new("demo".to_owned(), layers(), config());
    let b = ImageRecord::new("other-name".to_owned(), layers(), config());

    assert_eq!(a.id, b.id);
}

#[test]
fn image_id_changes_with_launch_config() {
    let a = ImageRecord::new("demo".to_owned(), layers(), config());
    let mut changed = config();
    changed.workers = Some(4);
    let b = ImageRecord::new("demo".to_owned(), layers(), changed);

    assert_ne!(a.id, b.id);
}

#[test]
fn image_top_layer_is_source() {
    let image = ImageRecord::new("demo".to_owned(), layers(), config());

    assert_eq!(image.top_layer().unwrap().kind, LayerKind::Source);
    assert!(image.layer(LayerKind::Dependencies).is_some());
}

#[test]
fn image_save_then_load() {
    let tmp = TempDir::new().unwrap();
    let state_dir = tmp.path().join(".strata");
    let image = ImageRecord::new("demo".to_owned(), layers(), config());

    let path = image.save(&state_dir).unwrap();
    assert_eq!(path, state_dir.join("image.json"));

    let loaded = ImageRecord::load(&state_dir).unwrap();
    assert_eq!(loaded, image);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"kind\": \"dependencies\""));
    assert!(!raw.contains("workers"));
}

#[test]
fn image_save_leaves_no_temp_files() {
    let tmp = TempDir::new().unwrap();
    let image = ImageRecord::new("demo".to_owned(), layers(), config());
    image.save(tmp.path()).unwrap();

    let names: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["image.json"]);
}

#[test]
fn image_load_missing_reports_build_hint() {
    let tmp = TempDir::new().unwrap();
    let err = ImageRecord::load(tmp.path()).unwrap_err();

    assert!(matches!(err, Error::ImageMissing { .. }));
    assert!(err.to_string().contains("strata build"));
}

#[test]
fn image_load_corrupt_is_decode_error() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("image.json"), "{ not json").unwrap();

    let err = ImageRecord::load(tmp.path()).unwrap_err();
    assert!(matches!(err, Error::ImageDecode { .. }));
}
