//! Admission decisions observed through the engine's write path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::StatusCode;
use reprint::{
    Admission, CachePolicy, CacheRequest, CacheResponse, Cacheability, DependencyToken, Expiry,
    Lookup, MemoryStore, OutputCache, RejectReason, RemovalCause, VaryDescriptor, Verb,
};

fn cache() -> OutputCache<Arc<MemoryStore>> {
    OutputCache::new(Arc::new(MemoryStore::new()))
}

fn public_policy() -> CachePolicy {
    let mut policy = CachePolicy::new(Utc::now());
    policy.set_cacheability(Cacheability::Public);
    policy.set_max_age(Duration::from_secs(300));
    policy
}

fn get(path: &str) -> CacheRequest {
    CacheRequest::new(Verb::Get, path)
}

fn ok(text: &'static str) -> CacheResponse {
    CacheResponse::new(StatusCode::OK).push_chunk(Bytes::from_static(text.as_bytes()))
}

fn reason_of(admission: Admission) -> RejectReason {
    match admission {
        Admission::Rejected(reason) => reason,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

fn descriptor_of(admission: Admission) -> Arc<VaryDescriptor> {
    match admission {
        Admission::Admitted {
            descriptor: Some(descriptor),
            ..
        } => descriptor,
        other => panic!("expected a varying admission, got {other:?}"),
    }
}

fn served_text(outcome: &Lookup) -> &str {
    match outcome {
        Lookup::Serve { entry, .. } => std::str::from_utf8(&entry.raw().chunks[0]).unwrap(),
        other => panic!("expected a served entry, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_responses_write_nothing() {
    let store = Arc::new(MemoryStore::new());
    let cache = OutputCache::new(store.clone());
    let request = get("/page");

    let untouched = CachePolicy::new(Utc::now());
    let admission = cache.consider(&request, &ok("x"), &untouched).await.unwrap();
    assert_eq!(reason_of(admission), RejectReason::PolicyUntouched);

    let not_found = CacheResponse::new(StatusCode::NOT_FOUND);
    let admission = cache
        .consider(&request, &not_found, &public_policy())
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::NonSuccessStatus);

    let with_cookies = ok("x").with_non_shareable_cookies(true);
    let admission = cache
        .consider(&request, &with_cookies, &public_policy())
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::NonShareableCookies);

    let streamed = ok("x").with_buffered(false);
    let admission = cache
        .consider(&request, &streamed, &public_policy())
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::Unbuffered);

    let head = CacheRequest::new(Verb::Head, "/page");
    let admission = cache.consider(&head, &ok("x"), &public_policy()).await.unwrap();
    assert_eq!(reason_of(admission), RejectReason::UnsupportedVerb);

    assert!(store.is_empty());
}

#[tokio::test]
async fn private_responses_stay_off_the_server() {
    let cache = cache();
    let mut policy = CachePolicy::new(Utc::now());
    policy.set_cacheability(Cacheability::Private);
    policy.set_max_age(Duration::from_secs(300));

    let admission = cache
        .consider(&get("/me"), &ok("mine"), &policy)
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::NotServerCacheable);
}

#[tokio::test]
async fn no_server_caching_overrides_a_public_declaration() {
    let cache = cache();
    let mut policy = public_policy();
    policy.set_no_server_caching();

    let admission = cache
        .consider(&get("/page"), &ok("x"), &policy)
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::NoServerCaching);
}

#[tokio::test]
async fn varying_admissions_write_descriptor_and_entry() {
    let store = Arc::new(MemoryStore::new());
    let cache = OutputCache::new(store.clone());

    cache
        .consider(&get("/bare"), &ok("bare"), &public_policy())
        .await
        .unwrap();
    assert_eq!(store.len(), 1);

    let mut policy = public_policy();
    policy.vary_by_headers_mut().add("accept-language");
    cache
        .consider(&get("/varied"), &ok("varied"), &policy)
        .await
        .unwrap();
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn readmission_reuses_an_equal_descriptor() {
    let cache = cache();
    let mut policy = public_policy();
    policy.vary_by_headers_mut().add("accept-language");
    let request = get("/page");

    let first = descriptor_of(cache.consider(&request, &ok("one"), &policy).await.unwrap());
    let second = descriptor_of(cache.consider(&request, &ok("two"), &policy).await.unwrap());

    assert_eq!(*first, *second);
    assert_eq!(first.id(), second.id());
    assert_eq!(served_text(&cache.lookup(&request).await), "two");
}

#[tokio::test]
async fn a_reshaped_policy_installs_a_fresh_descriptor() {
    let cache = cache();
    let request = get("/page");

    let mut policy = public_policy();
    policy.vary_by_headers_mut().add("accept-language");
    let first = descriptor_of(cache.consider(&request, &ok("one"), &policy).await.unwrap());

    let mut reshaped = public_policy();
    reshaped.vary_by_headers_mut().add("accept-language");
    reshaped.vary_by_headers_mut().add("accept-charset");
    let second = descriptor_of(
        cache
            .consider(&request, &ok("two"), &reshaped)
            .await
            .unwrap(),
    );

    assert_ne!(*first, *second);
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn authorized_requests_demote_public_responses() {
    let cache = cache();
    let request = get("/account").with_authorization(true);
    cache
        .consider(&request, &ok("balance"), &public_policy())
        .await
        .unwrap();

    match cache.lookup(&request).await {
        Lookup::Serve { entry, .. } => {
            assert_eq!(entry.settings().cacheability, Cacheability::Private);
            assert!(entry.settings().demoted_for_authorization);
        }
        other => panic!("expected a served entry, got {other:?}"),
    }
}

#[tokio::test]
async fn an_expired_policy_never_reaches_the_store() {
    let store = Arc::new(MemoryStore::new());
    let cache = OutputCache::new(store.clone());

    let mut policy = CachePolicy::new(Utc::now() - chrono::Duration::hours(2));
    policy.set_cacheability(Cacheability::Public);
    policy.set_expires(Utc::now() - chrono::Duration::hours(1));

    let admission = cache
        .consider(&get("/old"), &ok("stale"), &policy)
        .await
        .unwrap();
    assert_eq!(reason_of(admission), RejectReason::AlreadyExpired);
    assert!(store.is_empty());
}

#[tokio::test]
async fn sliding_windows_flow_through_to_the_store() {
    let cache = cache();
    let mut policy = public_policy();
    policy.set_sliding_expiration(true);
    // Sliding turns off the expiration policy; the tag keeps the entry
    // validatable.
    policy.set_etag("\"v1\"").unwrap();

    let admission = cache
        .consider(&get("/page"), &ok("x"), &policy)
        .await
        .unwrap();
    match admission {
        Admission::Admitted { expiry, .. } => {
            assert_eq!(expiry, Expiry::Sliding(Duration::from_secs(300)));
        }
        other => panic!("expected an admission, got {other:?}"),
    }
}

#[tokio::test]
async fn kernel_handles_ride_along_with_the_entry() {
    let cache = cache();
    let request = get("/page");
    let response = ok("body").with_kernel_cache_handle("kernel:/page");
    cache
        .consider(&request, &response, &public_policy())
        .await
        .unwrap();

    match cache.lookup(&request).await {
        Lookup::Serve { entry, .. } => {
            assert_eq!(entry.kernel_cache_handle(), Some("kernel:/page"));
        }
        other => panic!("expected a served entry, got {other:?}"),
    }
}

#[tokio::test]
async fn dependency_tokens_invalidate_admitted_entries() {
    let store = Arc::new(MemoryStore::new());
    let causes = Arc::new(Mutex::new(Vec::new()));
    let seen = causes.clone();
    let cache = OutputCache::new(store.clone()).on_removed(move |_, cause| {
        seen.lock().unwrap().push(cause);
    });

    let token = DependencyToken::new("catalog");
    let mut policy = public_policy();
    policy.add_dependency(token.clone());
    let request = get("/catalog/list");
    cache
        .consider(&request, &ok("items"), &policy)
        .await
        .unwrap();
    assert!(matches!(cache.lookup(&request).await, Lookup::Serve { .. }));

    assert_eq!(store.invalidate_dependency(&token), 1);
    assert!(matches!(cache.lookup(&request).await, Lookup::Miss));
    assert_eq!(*causes.lock().unwrap(), vec![RemovalCause::Invalidated]);
}
