use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;

use service::auth::{AuthConfig, CredentialManager};
use service::hierarchy::HierarchyService;
use service::repository::memory::MemoryTenantRepository;

fn config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "bench-secret".into(),
        issuer: "pos-admin".into(),
        access_ttl_secs: 900,
        refresh_ttl_secs: 86_400,
        op_timeout: Duration::from_secs(5),
        min_password_len: 8,
    }
}

fn bench_auth(c: &mut Criterion) {
    let repo = Arc::new(MemoryTenantRepository::new());
    let creds = CredentialManager::new(repo.clone(), config());
    let svc = HierarchyService::new(repo, creds.clone(), 50, Duration::from_secs(5));

    // pre-create user outside of the benchmark using a tokio runtime
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(svc.bootstrap_super_admin("bench@example.com", "Bench", "Benchmark1")).unwrap();
    let (_, pair) = rt.block_on(creds.login("bench@example.com", "Benchmark1")).unwrap();

    c.bench_function("auth_login_verify", |b| {
        b.iter(|| {
            let _ = rt.block_on(creds.login("bench@example.com", "Benchmark1")).unwrap();
        });
    });

    c.bench_function("auth_access_verify", |b| {
        b.iter(|| creds.verify(&pair.access_token).unwrap());
    });

    c.bench_function("auth_refresh", |b| {
        b.iter(|| {
            let _ = rt.block_on(creds.refresh(&pair.refresh_token)).unwrap();
        });
    });
}

criterion_group!(benches, bench_auth);
criterion_main!(benches);
