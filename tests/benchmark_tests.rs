//! Performance benchmarks for the admission hot path

use server::client::{outbound_channel, ClientHandle};
use server::{AdmissionRegistry, AdmitDecision, ConnectionIdentity};
use std::time::Instant;

/// Benchmarks identity extraction from well-formed origins
#[test]
fn benchmark_identity_extraction() {
    let origins: Vec<String> = (0..1_000)
        .map(|i| format!("10.0.{}.{}:{}", i / 256, i % 256, 40_000 + i))
        .collect();

    let iterations = 100;
    let start = Instant::now();

    for _ in 0..iterations {
        for origin in &origins {
            let identity = ConnectionIdentity::from_origin(origin);
            assert!(!identity.is_empty());
        }
    }

    let duration = start.elapsed();
    let total = iterations * origins.len();
    println!(
        "Identity extraction: {} origins in {:?} ({:.2} ns/origin)",
        total,
        duration,
        duration.as_nanos() as f64 / total as f64
    );

    // Should complete in under 1 second for 100k origins
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks admit/release cycles against the registry
#[tokio::test]
async fn benchmark_registry_admission() {
    let registry = AdmissionRegistry::default();
    let (tx, _rx) = outbound_channel();

    let hosts = 10_000u32;
    let start = Instant::now();

    for id in 0..hosts {
        let host = format!("10.{}.{}.{}", id >> 16, (id >> 8) & 0xff, id & 0xff);
        let client = ClientHandle::new(id, ConnectionIdentity::from(host.as_str()), format!("{}:1", host), tx.clone());
        assert_eq!(
            registry.admit(client.identity().clone(), &client).await,
            AdmitDecision::Admitted
        );
        assert!(matches!(
            registry.admit(client.identity().clone(), &client).await,
            AdmitDecision::Duplicate { .. }
        ));
    }

    for id in 0..hosts {
        let host = format!("10.{}.{}.{}", id >> 16, (id >> 8) & 0xff, id & 0xff);
        assert!(registry.release(&ConnectionIdentity::from(host.as_str()), id).await);
    }

    let duration = start.elapsed();
    println!(
        "Registry: {} admit/duplicate/release cycles in {:?} ({:.2} μs/cycle)",
        hosts,
        duration,
        duration.as_micros() as f64 / hosts as f64
    );

    assert!(registry.is_empty().await);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
