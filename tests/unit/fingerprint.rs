use std::collections::HashMap;

use request_coordinator::{HttpMethod, RequestDescriptor, RequestFingerprint};

#[test]
fn query_order_does_not_change_identity() {
    let forward: HashMap<String, String> = [("a", "1"), ("b", "2"), ("c", "3")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut backward = HashMap::new();
    for (k, v) in [("c", "3"), ("b", "2"), ("a", "1")] {
        backward.insert(k.to_string(), v.to_string());
    }

    let left = RequestFingerprint::new(HttpMethod::Get, "/posts", &forward);
    let right = RequestFingerprint::new(HttpMethod::Get, "/posts", &backward);
    assert_eq!(left, right);
    assert_eq!(left.canonical(), "GET /posts?a=1&b=2&c=3");
}

#[test]
fn method_path_and_values_all_matter() {
    let base = RequestFingerprint::of(&RequestDescriptor::get("/posts").with_query("page", "1"));
    let other_page =
        RequestFingerprint::of(&RequestDescriptor::get("/posts").with_query("page", "2"));
    let other_method =
        RequestFingerprint::of(&RequestDescriptor::post("/posts").with_query("page", "1"));
    let other_path =
        RequestFingerprint::of(&RequestDescriptor::get("/users").with_query("page", "1"));

    assert_ne!(base, other_page);
    assert_ne!(base, other_method);
    assert_ne!(base, other_path);
}

#[test]
fn separators_inside_values_do_not_alias() {
    let joined = RequestFingerprint::of(&RequestDescriptor::get("/q").with_query("a", "1&b=2"));
    let split = RequestFingerprint::of(
        &RequestDescriptor::get("/q")
            .with_query("a", "1")
            .with_query("b", "2"),
    );
    assert_ne!(joined, split);
}

#[test]
fn headers_and_body_are_not_part_of_identity() {
    let plain = RequestFingerprint::of(&RequestDescriptor::get("/me"));
    let decorated = RequestFingerprint::of(
        &RequestDescriptor::get("/me")
            .with_header("X-Trace", "abc")
            .requiring_reauthentication(),
    );
    assert_eq!(plain, decorated);
}

#[test]
fn storage_key_is_bounded_and_stable() {
    let long_path = format!("/{}", "segment/".repeat(40));
    let fingerprint = RequestFingerprint::of(&RequestDescriptor::get(long_path.clone()));
    let key = fingerprint.storage_key();
    assert!(key.len() <= 96 + 1 + 16);
    assert_eq!(key, RequestFingerprint::of(&RequestDescriptor::get(long_path)).storage_key());
}
