//! Capture-path scenarios: request head in, classified record in the queue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};

use beacon_edge::classify::{
    DatacenterTable, EdgeClassifiers, GeoCache, StabilityTracker, SubnetVelocity,
};
use beacon_edge::parser;
use beacon_edge::queue::CaptureQueue;

fn classifiers() -> EdgeClassifiers {
    EdgeClassifiers {
        stability: StabilityTracker::new(),
        velocity: SubnetVelocity::new(),
        datacenter: Arc::new(DatacenterTable::load(None).unwrap()),
        geo: GeoCache::new(None),
    }
}

fn peer() -> SocketAddr {
    "203.0.113.9:44000".parse().unwrap()
}

fn capture(
    classifiers: &EdgeClassifiers,
    queue: &CaptureQueue,
    path: &str,
    query: &str,
    headers: &HeaderMap,
) -> bool {
    match parser::build_record(path, query, headers, peer()) {
        Some((record, ip)) => {
            let tokens =
                classifiers.append_tokens(ip, &record.query, &record.ua, record.received_at);
            let query = tokens.merge_into(&record.query);
            queue.push(record.with_query(query));
            true
        }
        None => false,
    }
}

#[test]
fn forwarded_public_ip_is_classified_public() {
    let classifiers = classifiers();
    let queue = CaptureQueue::new(100);
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-forwarded-for",
        HeaderValue::from_static("8.8.8.8, 10.0.0.1"),
    );

    assert!(capture(
        &classifiers,
        &queue,
        "/ACME/spring_SMART.GIF",
        "sw=1920&sh=1080&ua=Mozilla%2F5.0",
        &headers,
    ));

    let record = queue.drain(1).into_iter().next().unwrap();
    assert_eq!(record.company, "ACME");
    assert_eq!(record.pixel, "spring");
    assert_eq!(record.ip, "8.8.8.8");
    assert!(record.query.contains("_srv_ipType=Public"));
}

#[test]
fn private_ip_skips_geo_lookups() {
    let classifiers = classifiers();
    let queue = CaptureQueue::new(100);
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.5.7"));

    capture(
        &classifiers,
        &queue,
        "/ACME/spring_SMART.GIF",
        "sw=1920&sh=1080",
        &headers,
    );

    let record = queue.drain(1).into_iter().next().unwrap();
    assert!(record.query.contains("_srv_ipType=Private"));
    assert!(!record.query.contains("_srv_geo"));
    assert!(!record.query.contains("_srv_datacenter"));
}

#[test]
fn datacenter_source_is_labeled() {
    let classifiers = classifiers();
    let queue = CaptureQueue::new(100);
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("3.5.140.2"));

    capture(
        &classifiers,
        &queue,
        "/ACME/spring_SMART.GIF",
        "sw=1920&sh=1080",
        &headers,
    );

    let record = queue.drain(1).into_iter().next().unwrap();
    assert!(record.query.contains("_srv_datacenter=aws"));
}

#[test]
fn short_query_and_wrong_suffix_are_not_enqueued() {
    let classifiers = classifiers();
    let queue = CaptureQueue::new(100);
    let headers = HeaderMap::new();

    assert!(!capture(
        &classifiers,
        &queue,
        "/ACME/spring_SMART.GIF",
        "sw=1",
        &headers
    ));
    assert!(!capture(
        &classifiers,
        &queue,
        "/ACME/spring.png",
        "sw=1920&sh=1080",
        &headers
    ));
    assert_eq!(queue.depth(), 0);
}

#[test]
fn repeat_visits_raise_fp_seen() {
    let classifiers = classifiers();
    let queue = CaptureQueue::new(100);
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("8.8.8.8"));

    for _ in 0..3 {
        capture(
            &classifiers,
            &queue,
            "/ACME/spring_SMART.GIF",
            "sw=1920&fp=stable-fp",
            &headers,
        );
    }
    let records = queue.drain(10);
    assert!(records[0].query.contains("_srv_fpSeen=1"));
    assert!(records[2].query.contains("_srv_fpSeen=3"));
    assert!(records[2].query.contains("_srv_fpStability=ok"));
}
