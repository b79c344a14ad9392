#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use strata_build::{BuildContext, Kustomizer, LoadRestrictor, STAGED_FILE_NAME};
use strata_compose::compose;
use strata_core::{BuildResult, ResourceEntry, ResourceMap, Tier};

fn temp_dir(tag: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("strata-{}-{}-{}", tag, nanos, SEQ.fetch_add(1, Ordering::SeqCst)));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn entry(v: serde_json::Value) -> ResourceEntry { ResourceEntry::from_json(v).unwrap() }

/// Reads the staged document and emits a Namespace named after its `namespace` field,
/// roughly what the real pipeline does for an overlay over a single Namespace base.
#[derive(Default)]
struct NamespaceEngine {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait::async_trait]
impl Kustomizer for NamespaceEngine {
    async fn run(&self, root: &Path, _restrictor: LoadRestrictor) -> Result<ResourceMap> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let doc = std::fs::read_to_string(root.join(STAGED_FILE_NAME));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let doc: serde_yaml::Value = serde_yaml::from_str(&doc?)?;
        let ns = doc["namespace"].as_str().unwrap_or("test-basic").to_string();
        Ok(ResourceMap::from(vec![entry(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": ns }
        }))]))
    }
}

/// Returns a fixed map and remembers the roots it was asked to build.
struct FixedEngine {
    map: ResourceMap,
    roots: Mutex<Vec<(PathBuf, LoadRestrictor)>>,
}

#[async_trait::async_trait]
impl Kustomizer for FixedEngine {
    async fn run(&self, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        self.roots.lock().unwrap().push((root.to_path_buf(), restrictor));
        Ok(self.map.clone())
    }
}

struct FailingEngine(&'static str);

#[async_trait::async_trait]
impl Kustomizer for FailingEngine {
    async fn run(&self, root: &Path, _restrictor: LoadRestrictor) -> Result<ResourceMap> {
        assert!(root.join(STAGED_FILE_NAME).exists(), "document must be staged while the build runs");
        Err(anyhow!(self.0))
    }
}

fn basic_map() -> ResourceMap {
    ResourceMap::from(vec![
        entry(serde_json::json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "test-basic"}})),
        entry(serde_json::json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "test", "namespace": "test-basic"}})),
        entry(serde_json::json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "test", "namespace": "test-basic"}})),
        entry(serde_json::json!({"apiVersion": "networking.k8s.io/v1beta1", "kind": "Ingress", "metadata": {"name": "test", "namespace": "test-basic"}})),
    ])
}

#[tokio::test]
async fn path_build_uses_root_as_is() {
    let root = temp_dir("path");
    let engine = Arc::new(FixedEngine { map: basic_map(), roots: Mutex::new(Vec::new()) });
    let ctx = BuildContext::new(engine.clone(), temp_dir("base"));

    let map = ctx.build_path(&root, LoadRestrictor::Unrestricted).await.unwrap();
    let res = BuildResult::from_resource_map(&map).unwrap();
    assert_eq!(res.ids.len(), 4);
    assert_eq!(res.ids_prio.tier(Tier::First).len(), 1);
    assert_eq!(res.ids_prio.tier(Tier::Default).len(), 3);
    assert!(res.ids_prio.tier(Tier::Last).is_empty());

    let roots = engine.roots.lock().unwrap().clone();
    assert_eq!(roots, vec![(root.clone(), LoadRestrictor::Unrestricted)]);
    assert!(!root.join(STAGED_FILE_NAME).exists());
}

#[tokio::test]
async fn overlay_is_staged_then_removed() {
    let base = temp_dir("overlay");
    let ctx = BuildContext::new(Arc::new(NamespaceEngine::default()), &base);
    let spec = compose(&serde_json::json!({ "namespace": "test-overlay-namespace", "resources": ["base"] }));

    let map = ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await.unwrap();
    let res = BuildResult::from_resource_map(&map).unwrap();
    let id: strata_core::ResourceId = "~G_v1_Namespace|~X|test-overlay-namespace".parse().unwrap();
    let body: serde_json::Value = serde_json::from_str(res.manifest(&id).unwrap()).unwrap();
    assert_eq!(body["metadata"]["name"], "test-overlay-namespace");
    assert!(!base.join(STAGED_FILE_NAME).exists(), "staged document must be cleaned up");
}

#[tokio::test]
async fn overlay_failure_is_prefixed_and_cleaned_up() {
    let base = temp_dir("fail");
    let ctx = BuildContext::new(
        Arc::new(FailingEngine("json: cannot unmarshal string into Go value of type common.OpenAPIDefinition (crd/initial/crd.yaml)")),
        &base,
    );
    let spec = compose(&serde_json::json!({ "crds": ["crd/initial/crd.yaml"] }));

    let e = ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await.unwrap_err().to_string();
    assert!(e.starts_with("kustomization overlay: "), "e={}", e);
    assert!(e.contains("cannot unmarshal string into Go value of type common.OpenAPIDefinition"), "e={}", e);
    assert!(e.contains("crd.yaml"), "e={}", e);
    assert!(!base.join(STAGED_FILE_NAME).exists());
}

#[tokio::test]
async fn path_failure_is_prefixed() {
    struct Broken;
    #[async_trait::async_trait]
    impl Kustomizer for Broken {
        async fn run(&self, _root: &Path, _r: LoadRestrictor) -> Result<ResourceMap> {
            Err(anyhow!("accumulating resources: missing.yaml: no such file or directory"))
        }
    }
    let ctx = BuildContext::new(Arc::new(Broken), temp_dir("base"));
    let e = ctx.build_path(Path::new("does/not/exist"), LoadRestrictor::RootOnly).await.unwrap_err().to_string();
    assert_eq!(e, "kustomization build: accumulating resources: missing.yaml: no such file or directory");
}

#[tokio::test]
async fn existing_kustomization_is_never_overwritten() {
    let base = temp_dir("existing");
    std::fs::write(base.join("kustomization.yaml"), "resources: []\n").unwrap();
    let engine = Arc::new(NamespaceEngine::default());
    let ctx = BuildContext::new(engine.clone(), &base);

    let e = ctx.build_overlay(&compose(&serde_json::json!({})), LoadRestrictor::RootOnly).await.unwrap_err().to_string();
    assert!(e.contains("refusing to overwrite existing kustomization.yaml"), "e={}", e);
    assert_eq!(std::fs::read_to_string(base.join("kustomization.yaml")).unwrap(), "resources: []\n");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_builds_are_identical() {
    let base = temp_dir("determinism");
    let ctx = BuildContext::new(Arc::new(NamespaceEngine::default()), &base);
    let spec = compose(&serde_json::json!({ "namespace": "again" }));
    let a = BuildResult::from_resource_map(&ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await.unwrap()).unwrap();
    let b = BuildResult::from_resource_map(&ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await.unwrap()).unwrap();
    assert_eq!(a, b);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlays_are_serialized_and_isolated() {
    let base = temp_dir("concurrent");
    let engine = Arc::new(NamespaceEngine { delay: Duration::from_millis(20), ..Default::default() });
    let ctx = BuildContext::new(engine.clone(), &base);

    let mut handles = Vec::new();
    for ns in ["team-a", "team-b", "team-c", "team-d"] {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            let spec = compose(&serde_json::json!({ "namespace": ns }));
            let map = ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await?;
            anyhow::Ok((ns, BuildResult::from_resource_map(&map)?))
        }));
    }
    for h in handles {
        let (ns, res) = h.await.unwrap().unwrap();
        let ids: Vec<String> = res.ids.iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec![format!("~G_v1_Namespace|~X|{}", ns)]);
    }
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1, "builds must not overlap");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
    assert!(!base.join(STAGED_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_contexts_do_not_share_a_guard() {
    let engine = Arc::new(NamespaceEngine { delay: Duration::from_millis(50), ..Default::default() });
    let a = BuildContext::new(engine.clone(), temp_dir("ctx-a"));
    let b = BuildContext::new(engine.clone(), temp_dir("ctx-b"));
    let spec_a = compose(&serde_json::json!({ "namespace": "a" }));
    let spec_b = compose(&serde_json::json!({ "namespace": "b" }));

    let (ra, rb) = tokio::join!(
        a.build_overlay(&spec_a, LoadRestrictor::RootOnly),
        b.build_overlay(&spec_b, LoadRestrictor::RootOnly),
    );
    assert_eq!(ra.unwrap().entries()[0].name, "a");
    assert_eq!(rb.unwrap().entries()[0].name, "b");
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contexts_on_one_base_dir_share_staging() {
    let base = temp_dir("shared-base");
    let engine = Arc::new(NamespaceEngine { delay: Duration::from_millis(30), ..Default::default() });
    let a = BuildContext::new(engine.clone(), &base);
    let b = BuildContext::new(engine.clone(), &base);
    let spec_a = compose(&serde_json::json!({ "namespace": "a" }));
    let spec_b = compose(&serde_json::json!({ "namespace": "b" }));

    let (ra, rb) = tokio::join!(
        a.build_overlay(&spec_a, LoadRestrictor::RootOnly),
        b.build_overlay(&spec_b, LoadRestrictor::RootOnly),
    );
    assert_eq!(ra.unwrap().entries()[0].name, "a");
    assert_eq!(rb.unwrap().entries()[0].name, "b");
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!base.join(STAGED_FILE_NAME).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unguarded_overlays_still_stage_one_at_a_time() {
    let base = temp_dir("unguarded");
    let engine = Arc::new(NamespaceEngine { delay: Duration::from_millis(30), ..Default::default() });
    let a = BuildContext::unguarded(engine.clone(), &base);
    let b = BuildContext::unguarded(engine.clone(), &base);
    let spec_a = compose(&serde_json::json!({ "namespace": "a" }));
    let spec_b = compose(&serde_json::json!({ "namespace": "b" }));

    let (ra, rb) = tokio::join!(
        a.build_overlay(&spec_a, LoadRestrictor::RootOnly),
        b.build_overlay(&spec_b, LoadRestrictor::RootOnly),
    );
    assert_eq!(ra.unwrap().entries()[0].name, "a");
    assert_eq!(rb.unwrap().entries()[0].name, "b");
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unguarded_path_builds_run_in_parallel() {
    struct Slow(NamespaceEngine);
    #[async_trait::async_trait]
    impl Kustomizer for Slow {
        async fn run(&self, _root: &Path, _r: LoadRestrictor) -> Result<ResourceMap> {
            let now = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.0.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ResourceMap::new())
        }
    }
    let engine = Arc::new(Slow(NamespaceEngine::default()));
    let base = temp_dir("unguarded-path");
    let ctx = BuildContext::unguarded(engine.clone(), &base);
    let (ra, rb) = tokio::join!(
        ctx.build_path(&base, LoadRestrictor::RootOnly),
        ctx.build_path(&base, LoadRestrictor::RootOnly),
    );
    assert!(ra.unwrap().is_empty() && rb.unwrap().is_empty());
    assert_eq!(engine.0.max_in_flight.load(Ordering::SeqCst), 2);
}
