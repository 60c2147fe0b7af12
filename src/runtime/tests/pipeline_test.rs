//! Integration test: incremental publishing against an in-memory registry.
//!
//! Drives `publish` end to end:
//!
//! 1. Seed the registry with a default base image
//! 2. Publish a context directory (clean slate)
//! 3. Mutate the directory and publish again
//! 4. Read the pushed layers back and check entries, whiteouts and manifest
//!
//! ## Running
//!
//! ```bash
//! cargo test -p kontext-runtime --test pipeline_test
//! ```

use std::fs;
use std::io::Read;
use std::path::Path;

use kontext_core::{ChangeDetection, KontextConfig};
use kontext_runtime::base::BaseState;
use kontext_runtime::context::hasher::sha256_bytes;
use kontext_runtime::oci::{
    uncompressed_layer, ImageReference, ImageRegistry, LayerHistory, MemoryRegistry, NewLayer,
    RemoteImage,
};
use kontext_runtime::{publish, LayerSynthesizer, Manifest, PublishOutcome, PublishRequest};
use oci_distribution::manifest::OciImageManifest;
use tempfile::TempDir;

const TARGET: &str = "registry.local/team/context:main";

fn scratch() -> RemoteImage {
    let config =
        br#"{"architecture":"amd64","os":"linux","rootfs":{"type":"layers","diff_ids":[]},"history":[]}"#
            .to_vec();
    let mut manifest = OciImageManifest::default();
    manifest.config.digest = format!("sha256:{}", sha256_bytes(&config));
    manifest.config.size = config.len() as i64;
    RemoteImage::new(None, manifest, config)
}

fn layer(tar: Vec<u8>) -> NewLayer {
    NewLayer {
        tar,
        history: LayerHistory::new("fixture"),
    }
}

/// Registry holding a one-layer default base image.
async fn seeded_registry(config: &KontextConfig) -> MemoryRegistry {
    let registry = MemoryRegistry::new();
    let extractor = scratch()
        .append_layers(vec![layer(b"extractor binary".to_vec())])
        .unwrap();
    let reference = ImageReference::parse(&config.default_base_image).unwrap();
    registry.insert(&reference, &extractor, Vec::new()).await.unwrap();
    registry
}

async fn run(
    config: &KontextConfig,
    registry: &MemoryRegistry,
    dir: &Path,
    dry_run: bool,
) -> PublishOutcome {
    publish(
        config,
        registry,
        PublishRequest {
            directory: dir.to_path_buf(),
            target: ImageReference::parse(TARGET).unwrap(),
            dry_run,
        },
    )
    .await
    .unwrap()
}

/// Uncompressed tarballs of every layer of the target image.
async fn pushed_layers(registry: &MemoryRegistry) -> Vec<Vec<u8>> {
    let image = registry
        .resolve(&ImageReference::parse(TARGET).unwrap())
        .await
        .unwrap();
    let mut layers = Vec::new();
    for index in 0..image.layers().len() {
        layers.push(uncompressed_layer(registry, &image, index).await.unwrap());
    }
    layers
}

fn entries(tar: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(tar);
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let mut e = e.unwrap();
            let name = e.path().unwrap().to_string_lossy().to_string();
            let mut body = Vec::new();
            e.read_to_end(&mut body).unwrap();
            (name, body)
        })
        .collect()
}

fn names(tar: &[u8]) -> Vec<String> {
    entries(tar).into_iter().map(|(name, _)| name).collect()
}

fn manifest_json(tar: &[u8]) -> serde_json::Value {
    let (name, body) = entries(tar).remove(0);
    assert_eq!(name, "var/lib/kontext/manifest.json");
    serde_json::from_slice(&body).unwrap()
}

/// `a/b` and `foo/bar`.
fn scenario_a_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("a")).unwrap();
    fs::create_dir(tmp.path().join("foo")).unwrap();
    fs::write(tmp.path().join("a/b"), "first file").unwrap();
    fs::write(tmp.path().join("foo/bar"), "second file").unwrap();
    tmp
}

#[tokio::test]
async fn test_clean_slate_publish() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();

    let outcome = run(&config, &registry, tree.path(), false).await;
    assert!(matches!(outcome, PublishOutcome::Published { .. }));
    let summary = outcome.summary();
    assert_eq!(summary.base, BaseState::CleanSlate);
    assert_eq!(summary.included, 4);
    assert_eq!(summary.removed, 0);
    assert_eq!(summary.manifest_entries, 4);

    let layers = pushed_layers(&registry).await;
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0], b"extractor binary");

    let data = entries(&layers[1]);
    let files: Vec<&(String, Vec<u8>)> = data.iter().filter(|(_, body)| !body.is_empty()).collect();
    assert_eq!(files.len(), 2);
    assert_eq!(
        names(&layers[1]),
        vec![
            "var/run/kontext/a",
            "var/run/kontext/a/b",
            "var/run/kontext/foo",
            "var/run/kontext/foo/bar",
        ]
    );
    assert_eq!(data[1].1, b"first file");

    assert_eq!(
        manifest_json(&layers[2]),
        serde_json::json!({
            "files": {
                "a": "",
                "a/b": sha256_bytes(b"first file"),
                "foo": "",
                "foo/bar": sha256_bytes(b"second file"),
            }
        })
    );
}

#[tokio::test]
async fn test_unchanged_tree_pushes_nothing() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();

    run(&config, &registry, tree.path(), false).await;
    assert_eq!(registry.push_count().await, 1);

    let outcome = run(&config, &registry, tree.path(), false).await;
    assert!(matches!(outcome, PublishOutcome::Unchanged(_)));
    assert_eq!(outcome.summary().base, BaseState::Resolved);
    assert_eq!(outcome.summary().changed(), 0);
    assert_eq!(registry.push_count().await, 1);
    assert_eq!(pushed_layers(&registry).await.len(), 3);
}

#[tokio::test]
async fn test_second_round_adds_only_new_files() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;

    fs::write(tree.path().join("a/c"), "third file").unwrap();
    let outcome = run(&config, &registry, tree.path(), false).await;
    assert_eq!(outcome.summary().base, BaseState::Resolved);
    assert_eq!(outcome.summary().included, 1);

    let layers = pushed_layers(&registry).await;
    assert_eq!(layers.len(), 5);
    assert_eq!(names(&layers[3]), vec!["var/run/kontext/a/c"]);
    assert_eq!(manifest_json(&layers[4])["files"].as_object().unwrap().len(), 5);
}

#[tokio::test]
async fn test_second_round_uploads_only_new_layers() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;
    let before = registry.uploads().await.len();
    let mounts_before = registry.mount_count().await;

    fs::write(tree.path().join("a/c"), "third file").unwrap();
    run(&config, &registry, tree.path(), false).await;

    let image = registry
        .resolve(&ImageReference::parse(TARGET).unwrap())
        .await
        .unwrap();
    let digests = image.layer_digests();
    let uploads = registry.uploads().await;
    assert_eq!(
        uploads[before..],
        [
            digests[3].to_string(),
            digests[4].to_string(),
            image.manifest().config.digest.clone(),
        ]
    );
    // Base layer plus both layers of the first round
    assert_eq!(registry.mount_count().await - mounts_before, 3);
}

#[tokio::test]
async fn test_recorded_root_entry_is_ignored() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = TempDir::new().unwrap();
    fs::write(tree.path().join("a"), "kept").unwrap();

    let document = format!(r#"{{"files":{{".":"","a":"{}"}}}}"#, sha256_bytes(b"kept"));
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(document.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o555);
    builder
        .append_data(&mut header, "var/lib/kontext/manifest.json", document.as_bytes())
        .unwrap();
    let manifest_tar = builder.into_inner().unwrap();

    let default_base = ImageReference::parse(&config.default_base_image).unwrap();
    let base = registry.resolve(&default_base).await.unwrap();
    let base_blob = registry.layer_blob(&base, 0).await.unwrap();
    let previous = base
        .append_layers(vec![layer(b"data".to_vec()), layer(manifest_tar)])
        .unwrap();
    let target = ImageReference::parse(TARGET).unwrap();
    registry.insert(&target, &previous, vec![base_blob]).await.unwrap();

    let outcome = run(&config, &registry, tree.path(), false).await;
    assert!(matches!(outcome, PublishOutcome::Unchanged(_)));
    assert_eq!(outcome.summary().base, BaseState::Resolved);
    assert_eq!(outcome.summary().whiteouts, 0);
    assert_eq!(registry.push_count().await, 0);
}

#[tokio::test]
async fn test_removed_subtree_whites_out_its_root() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;

    fs::remove_dir_all(tree.path().join("foo")).unwrap();
    let outcome = run(&config, &registry, tree.path(), false).await;
    let summary = outcome.summary();
    assert_eq!(summary.included, 0);
    assert_eq!(summary.removed, 2);
    assert_eq!(summary.whiteouts, 1);

    let layers = pushed_layers(&registry).await;
    assert_eq!(names(&layers[3]), vec!["var/run/kontext/.wh.foo"]);
    assert_eq!(
        manifest_json(&layers[4]),
        serde_json::json!({"files": {"a": "", "a/b": sha256_bytes(b"first file")}})
    );
}

#[tokio::test]
async fn test_removed_file_in_surviving_directory() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;

    fs::remove_file(tree.path().join("a/b")).unwrap();
    run(&config, &registry, tree.path(), false).await;

    let layers = pushed_layers(&registry).await;
    assert_eq!(names(&layers[3]), vec!["var/run/kontext/a/.wh.b"]);
}

#[tokio::test]
async fn test_orphaned_entry_gets_no_whiteout() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;

    // Previous round recorded gone/x without a key for gone itself
    let mut previous = Manifest::new();
    previous.add("gone/x", sha256_bytes(b"x"));
    let manifest_tar = LayerSynthesizer::default().manifest_layer(&previous).unwrap();
    let prior = scratch().append_layers(vec![layer(manifest_tar)]).unwrap();
    registry
        .insert(&ImageReference::parse(TARGET).unwrap(), &prior, Vec::new())
        .await
        .unwrap();

    let tree = TempDir::new().unwrap();
    fs::write(tree.path().join("keep"), "k").unwrap();
    let outcome = run(&config, &registry, tree.path(), false).await;
    assert_eq!(outcome.summary().removed, 1);
    assert_eq!(outcome.summary().whiteouts, 0);

    let layers = pushed_layers(&registry).await;
    assert_eq!(names(&layers[1]), vec!["var/run/kontext/keep"]);
    assert!(names(&layers[1]).iter().all(|n| !n.contains(".wh.")));
}

#[tokio::test]
async fn test_presence_mode_misses_content_change() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;

    fs::write(tree.path().join("a/b"), "rewritten").unwrap();
    let outcome = run(&config, &registry, tree.path(), false).await;
    assert!(matches!(outcome, PublishOutcome::Unchanged(_)));
    assert_eq!(registry.push_count().await, 1);
}

#[tokio::test]
async fn test_content_mode_republishes_changed_file() {
    let config = KontextConfig {
        change_detection: ChangeDetection::Content,
        ..Default::default()
    };
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();
    run(&config, &registry, tree.path(), false).await;

    fs::write(tree.path().join("a/b"), "rewritten").unwrap();
    let outcome = run(&config, &registry, tree.path(), false).await;
    assert_eq!(outcome.summary().included, 1);

    let layers = pushed_layers(&registry).await;
    let data = entries(&layers[3]);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0], ("var/run/kontext/a/b".to_string(), b"rewritten".to_vec()));
    assert_eq!(
        manifest_json(&layers[4])["files"]["a/b"],
        serde_json::json!(sha256_bytes(b"rewritten"))
    );
}

#[tokio::test]
async fn test_publishing_is_deterministic() {
    let config = KontextConfig::default();
    let tree = scenario_a_tree();

    let first = seeded_registry(&config).await;
    run(&config, &first, tree.path(), false).await;
    let second = seeded_registry(&config).await;
    run(&config, &second, tree.path(), false).await;

    let target = ImageReference::parse(TARGET).unwrap();
    let a = first.resolve(&target).await.unwrap();
    let b = second.resolve(&target).await.unwrap();
    assert_eq!(a.layer_digests(), b.layer_digests());
    assert_eq!(a.config_bytes(), b.config_bytes());
}

#[tokio::test]
async fn test_dry_run_does_not_push() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = scenario_a_tree();

    let outcome = run(&config, &registry, tree.path(), true).await;
    match outcome {
        PublishOutcome::DryRun { summary, image } => {
            assert_eq!(summary.included, 4);
            assert!(summary.data_layer_bytes > 0);
            assert!(summary.manifest_layer_bytes > 0);
            assert_eq!(image.layers().len(), 3);
        }
        other => panic!("expected dry run, got {:?}", other),
    }
    assert_eq!(registry.push_count().await, 0);
    assert!(!registry.contains(&ImageReference::parse(TARGET).unwrap()).await);
}

#[tokio::test]
async fn test_unreadable_history_falls_back_to_default_base() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;

    let garbage = scratch()
        .append_layers(vec![layer(b"definitely not a tar archive".to_vec())])
        .unwrap();
    registry
        .insert(&ImageReference::parse(TARGET).unwrap(), &garbage, Vec::new())
        .await
        .unwrap();

    let tree = scenario_a_tree();
    let outcome = run(&config, &registry, tree.path(), false).await;
    assert_eq!(outcome.summary().base, BaseState::CleanSlate);
    assert_eq!(outcome.summary().included, 4);

    let layers = pushed_layers(&registry).await;
    assert_eq!(layers.len(), 3);
    assert_eq!(layers[0], b"extractor binary");
}

#[tokio::test]
async fn test_empty_directory_is_noop() {
    let config = KontextConfig::default();
    let registry = seeded_registry(&config).await;
    let tree = TempDir::new().unwrap();

    let outcome = run(&config, &registry, tree.path(), false).await;
    assert!(matches!(outcome, PublishOutcome::Unchanged(_)));
    assert_eq!(outcome.summary().base, BaseState::CleanSlate);
    assert_eq!(registry.push_count().await, 0);
}
