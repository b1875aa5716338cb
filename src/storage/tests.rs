//! Unit tests for state key layout and store behaviour.

use super::*;
use crate::test_support::MemoryObjectStore;
use rstest::{fixture, rstest};
use std::time::Duration;

#[fixture]
fn store() -> StateStore<MemoryObjectStore> {
    StateStore::new(
        MemoryObjectStore::default(),
        "/envs/",
        Encryption::new(Some(String::from("AES256")), None),
    )
}

#[rstest]
#[case("envs", "envs/env-1.tfstate", "envs/env-1.tfstate.tainted")]
#[case("/nested/path/", "nested/path/env-1.tfstate", "nested/path/env-1.tfstate.tainted")]
#[case("", "env-1.tfstate", "env-1.tfstate.tainted")]
fn keys_follow_bucket_path(#[case] path: &str, #[case] stable: &str, #[case] tainted: &str) {
    let state = StateStore::new(MemoryObjectStore::default(), path, Encryption::default());

    assert_eq!(state.key("env-1", StateKind::Stable), stable);
    assert_eq!(state.key("env-1", StateKind::Tainted), tainted);
}

#[rstest]
#[case(None, None, None, None)]
#[case(Some("AES256"), None, Some("AES256"), None)]
#[case(None, Some("kms-key"), Some("aws:kms"), Some("kms-key"))]
#[case(Some("aws:kms"), Some("kms-key"), Some("aws:kms"), Some("kms-key"))]
#[case(Some(" "), Some(""), None, None)]
fn encryption_infers_kms_mode(
    #[case] mode: Option<&str>,
    #[case] key: Option<&str>,
    #[case] expected_mode: Option<&str>,
    #[case] expected_key: Option<&str>,
) {
    let encryption = Encryption::new(mode.map(str::to_owned), key.map(str::to_owned));

    assert_eq!(encryption.mode.as_deref(), expected_mode);
    assert_eq!(encryption.kms_key_id.as_deref(), expected_key);
}

#[rstest]
#[tokio::test]
async fn fetch_reports_absence_as_none(store: StateStore<MemoryObjectStore>) {
    let state = store.fetch("missing").await.expect("fetch should succeed");

    assert_eq!(state, None);
}

#[rstest]
#[tokio::test]
async fn stable_and_tainted_writes_are_independent(store: StateStore<MemoryObjectStore>) {
    store
        .put("env-1", b"good".to_vec(), false)
        .await
        .expect("stable put");
    store
        .put("env-1", b"bad".to_vec(), true)
        .await
        .expect("tainted put");

    assert_eq!(store.fetch("env-1").await.expect("fetch"), Some(b"good".to_vec()));
    assert_eq!(
        store.fetch_tainted("env-1").await.expect("fetch tainted"),
        Some(b"bad".to_vec())
    );

    store.delete("env-1", true).await.expect("delete tainted");

    assert_eq!(store.object_store().keys(), vec![String::from("envs/env-1.tfstate")]);
}

#[rstest]
#[tokio::test]
async fn put_applies_encryption(store: StateStore<MemoryObjectStore>) {
    store
        .put("env-1", b"state".to_vec(), false)
        .await
        .expect("put");

    let used = store
        .object_store()
        .encryption_for("envs/env-1.tfstate")
        .expect("encryption recorded");
    assert_eq!(used.mode.as_deref(), Some("AES256"));
}

#[rstest]
#[tokio::test]
async fn deleting_absent_key_succeeds(store: StateStore<MemoryObjectStore>) {
    store
        .delete("never-existed", false)
        .await
        .expect("delete of absent key is not an error");
}

#[rstest]
#[case(&["envs/env-1.tfstate"], true)]
#[case(&["envs/env-1.tfstate.tainted"], true)]
#[case(&["envs/other.tfstate", "elsewhere/env-1.tfstate"], false)]
#[tokio::test]
async fn exists_checks_both_keys(
    store: StateStore<MemoryObjectStore>,
    #[case] seeded: &[&str],
    #[case] expected: bool,
) {
    for key in seeded {
        store.object_store().insert(key, b"{}".to_vec());
    }

    assert_eq!(store.exists("env-1").await.expect("exists"), expected);
}

#[rstest]
#[tokio::test]
async fn transport_failures_surface_as_storage_errors(store: StateStore<MemoryObjectStore>) {
    store.object_store().fail_on("get");

    let err = store.fetch("env-1").await.expect_err("get should fail");

    assert!(
        matches!(err, StorageError::Transport { operation: "get", ref key, .. } if key == "envs/env-1.tfstate"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn list_groups_keys_by_environment(store: StateStore<MemoryObjectStore>) {
    for key in [
        "envs/alpha.tfstate",
        "envs/beta.tfstate.tainted",
        "envs/gamma.tfstate",
        "envs/gamma.tfstate.tainted",
        "envs/nested/delta.tfstate",
        "envs/readme.txt",
        "other/epsilon.tfstate",
    ] {
        store.object_store().insert(key, b"{}".to_vec());
    }

    let envs = store.list().await.expect("list");

    let summary: Vec<(&str, bool, bool)> = envs
        .iter()
        .map(|env| (env.env_name.as_str(), env.stable, env.tainted))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("alpha", true, false),
            ("beta", false, true),
            ("gamma", true, true),
        ]
    );
}

struct StalledStore;

impl ObjectStore for StalledStore {
    fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        })
    }

    fn put<'a>(
        &'a self,
        _key: &'a str,
        _body: Vec<u8>,
        _encryption: &'a Encryption,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn exists<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async { Ok(false) })
    }

    fn list<'a>(&'a self, _prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[rstest]
#[tokio::test]
async fn slow_calls_time_out() {
    let store = StateStore::new(StalledStore, "envs", Encryption::default())
        .with_deadline(Some(Instant::now() + Duration::from_millis(50)));

    let err = store.fetch("env-1").await.expect_err("fetch should time out");

    assert_eq!(
        err,
        StorageError::Timeout {
            operation: "get",
            key: String::from("envs/env-1.tfstate"),
        }
    );
}

#[rstest]
#[tokio::test]
async fn slow_client_setup_is_bounded_by_the_run_deadline() {
    let deadline = Instant::now() + Duration::from_millis(50);

    let err = within_deadline(Some(deadline), "connect", "state-bucket", async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    })
    .await
    .expect_err("setup should time out");

    assert_eq!(
        err,
        StorageError::Timeout {
            operation: "connect",
            key: String::from("state-bucket"),
        }
    );
    assert_eq!(err.to_string(), "timed out during connect of state-bucket");
}

#[rstest]
#[tokio::test]
async fn calls_without_deadline_run_to_completion() {
    let value = within_deadline(None, "connect", "state-bucket", async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(7)
    })
    .await
    .expect("no deadline");

    assert_eq!(value, 7);
}
