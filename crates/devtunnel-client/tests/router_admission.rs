//! Invocation router: lifecycle, admission and the runtime drain lock.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use devtunnel_client::config::{FunctionConcurrency, RuntimeConcurrency};
use devtunnel_client::runtime::{AdmissionPolicy, InvocationRouter};
use devtunnel_core::ErrorCode;

use support::{request, within, MockInvoker};

async fn active_router(
    runtime: RuntimeConcurrency,
    function: FunctionConcurrency,
) -> (Arc<InvocationRouter>, Arc<MockInvoker>) {
    let invoker = MockInvoker::new();
    let router = Arc::new(InvocationRouter::new(
        invoker.clone(),
        AdmissionPolicy { runtime, function },
    ));
    router.init().await.unwrap();
    (router, invoker)
}

/// Let spawned tasks run up to their next blocking point.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn lifecycle_guards() {
    let invoker = MockInvoker::new();
    let router = InvocationRouter::new(invoker.clone(), AdmissionPolicy::default());

    let resp = router.invoke(request("f1", json!({}))).await;
    assert_eq!(resp.error_kind(), Some("RUNTIME_NOT_ACTIVE"));
    assert_eq!(router.reload().await.unwrap_err().code(), ErrorCode::RuntimeNotActive);

    router.init().await.unwrap();
    assert!(router.is_active());
    assert_eq!(router.init().await.unwrap_err().code(), ErrorCode::RuntimeAlreadyActive);
    assert_eq!(invoker.events(), vec!["init"]);

    let resp = router.invoke(request("f1", json!({}))).await;
    assert!(!resp.is_error());
    assert_eq!(resp.response.unwrap()["function"], "f1");
}

#[tokio::test]
async fn reject_mode_turns_away_any_concurrent_invocation() {
    let (router, invoker) = active_router(RuntimeConcurrency::Reject, FunctionConcurrency::Wait).await;

    let first = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f1", json!({"hold": true}))).await })
    };
    invoker.wait_for("start:f1").await;

    let same = router.invoke(request("f1", json!({}))).await;
    assert_eq!(same.error_kind(), Some("RUNTIME_IN_USE"));
    let other = router.invoke(request("f2", json!({}))).await;
    assert_eq!(other.error_kind(), Some("RUNTIME_IN_USE"));
    assert_eq!(other.error.unwrap().internal, Some(true));

    invoker.release(1);
    assert!(!within("first invocation", first).await.unwrap().is_error());

    let after = router.invoke(request("f2", json!({}))).await;
    assert!(!after.is_error());
}

#[tokio::test]
async fn per_function_reject_isolates_functions() {
    let (router, invoker) =
        active_router(RuntimeConcurrency::PerFunction, FunctionConcurrency::Reject).await;

    let spawn = |function: &'static str| {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request(function, json!({"hold": true}))).await })
    };
    let f1 = spawn("f1");
    let f2 = spawn("f2");
    invoker.wait_for("start:f1").await;
    invoker.wait_for("start:f2").await;

    let dup = router.invoke(request("f1", json!({}))).await;
    assert_eq!(dup.error_kind(), Some("FUNCTION_IN_USE"));

    invoker.release(2);
    assert!(!within("f1", f1).await.unwrap().is_error());
    assert!(!within("f2", f2).await.unwrap().is_error());
}

#[tokio::test]
async fn wait_mode_queues_instead_of_rejecting() {
    let (router, invoker) = active_router(RuntimeConcurrency::Wait, FunctionConcurrency::Reject).await;

    let first = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f1", json!({"hold": true}))).await })
    };
    invoker.wait_for("start:f1").await;

    let second = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f2", json!({}))).await })
    };
    settle().await;
    assert!(!invoker.saw("start:f2"));

    invoker.release(1);
    assert!(!within("f1", first).await.unwrap().is_error());
    assert!(!within("f2", second).await.unwrap().is_error());
    assert_eq!(invoker.events(), vec!["init", "start:f1", "end:f1", "start:f2", "end:f2"]);
}

#[tokio::test]
async fn reload_drains_running_and_holds_back_new_invocations() {
    let (router, invoker) =
        active_router(RuntimeConcurrency::PerFunction, FunctionConcurrency::Reject).await;

    let running = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f1", json!({"hold": true}))).await })
    };
    invoker.wait_for("start:f1").await;

    let reload = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.reload().await })
    };
    settle().await;
    assert!(!invoker.saw("reload"));

    let late = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f2", json!({}))).await })
    };
    settle().await;
    assert!(!invoker.saw("start:f2"));

    invoker.release(1);
    within("running", running).await.unwrap();
    within("reload", reload).await.unwrap().unwrap();
    assert!(!within("late", late).await.unwrap().is_error());

    assert_eq!(
        invoker.events(),
        vec!["init", "start:f1", "end:f1", "reload", "start:f2", "end:f2"]
    );
}

#[tokio::test]
async fn destroy_does_not_wait_for_running_invocations() {
    let (router, invoker) = active_router(RuntimeConcurrency::Reject, FunctionConcurrency::Reject).await;

    let running = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f1", json!({"hold": true}))).await })
    };
    invoker.wait_for("start:f1").await;

    within("destroy", router.destroy()).await.unwrap();
    assert!(!router.is_active());
    assert!(invoker.saw("destroy"));
    assert!(!running.is_finished());

    let rejected = router.invoke(request("f2", json!({}))).await;
    assert_eq!(rejected.error_kind(), Some("RUNTIME_NOT_ACTIVE"));

    // second destroy is a no-op
    router.destroy().await.unwrap();
    assert_eq!(invoker.events().iter().filter(|e| *e == "destroy").count(), 1);

    invoker.release(1);
    within("running", running).await.unwrap();
}

#[tokio::test]
async fn queued_invocation_sees_destroy() {
    let (router, invoker) = active_router(RuntimeConcurrency::Wait, FunctionConcurrency::Reject).await;

    let running = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f1", json!({"hold": true}))).await })
    };
    invoker.wait_for("start:f1").await;

    let queued = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.invoke(request("f2", json!({}))).await })
    };
    settle().await;
    router.destroy().await.unwrap();
    invoker.release(1);

    within("running", running).await.unwrap();
    let resp = within("queued", queued).await.unwrap();
    assert_eq!(resp.error_kind(), Some("RUNTIME_NOT_ACTIVE"));
    assert!(!invoker.saw("start:f2"));
}

#[tokio::test]
async fn backend_failures_become_structured_errors() {
    let (router, _invoker) = active_router(RuntimeConcurrency::Reject, FunctionConcurrency::Reject).await;

    let failed = router.invoke(request("f1", json!({"fail": true}))).await;
    let err = failed.error.unwrap();
    assert_eq!(err.kind, "BOOM");
    assert_eq!(err.message, "backend exploded");
    assert_eq!(err.internal, Some(true));

    let panicked = router.invoke(request("f1", json!({"panic": true}))).await;
    assert_eq!(panicked.error_kind(), Some("PANIC"));

    // the admission slot was released both times
    let resp = tokio::time::timeout(Duration::from_secs(1), router.invoke(request("f1", json!({}))))
        .await
        .unwrap();
    assert!(!resp.is_error());
}
