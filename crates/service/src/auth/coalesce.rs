use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use super::domain::AccessToken;
use super::errors::AuthError;

type SharedRefresh = Shared<BoxFuture<'static, Result<AccessToken, AuthError>>>;

/// One in-flight refresh per key. Late callers await the pending result
/// instead of starting a second refresh.
#[derive(Default)]
pub struct RefreshCoalescer {
    inflight: Mutex<HashMap<String, (u64, SharedRefresh)>>,
    next_id: AtomicU64,
}

impl RefreshCoalescer {
    pub fn new() -> Self { Self::default() }

    pub async fn run<F>(&self, key: &str, start: F) -> Result<AccessToken, AuthError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<AccessToken, AuthError>>,
    {
        let (id, pending) = {
            let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get(key) {
                Some((id, pending)) => (*id, pending.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let pending = start().shared();
                    map.insert(key.to_string(), (id, pending.clone()));
                    (id, pending)
                }
            }
        };

        let result = pending.await;

        // 只移除自己登记的那一次，避免误删后来者
        let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).map(|(current, _)| *current == id).unwrap_or(false) {
            map.remove(key);
        }
        result
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;

    fn token(n: u32) -> AccessToken {
        AccessToken { access_token: format!("t{n}"), token_type: "Bearer".into(), expires_in: 60, role: Role::Employee }
    }

    #[tokio::test]
    async fn overlapping_calls_share_one_result() {
        let coalescer = RefreshCoalescer::new();
        let starts = Arc::new(AtomicU32::new(0));
        let make = || {
            let starts = starts.clone();
            move || -> BoxFuture<'static, Result<AccessToken, AuthError>> {
                async move {
                    let n = starts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(token(n))
                }
                .boxed()
            }
        };
        let (a, b) = tokio::join!(coalescer.run("k", make()), coalescer.run("k", make()));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);

        // sequential calls start fresh
        let c = coalescer.run("k", make()).await.unwrap();
        assert_eq!(c.access_token, "t1");
    }

    #[tokio::test]
    async fn errors_are_shared_too() {
        let coalescer = RefreshCoalescer::new();
        let fail = || -> BoxFuture<'static, Result<AccessToken, AuthError>> {
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(AuthError::Revoked)
            }
            .boxed()
        };
        let (a, b) = tokio::join!(coalescer.run("k", fail), coalescer.run("k", fail));
        assert_eq!(a, Err(AuthError::Revoked));
        assert_eq!(b, Err(AuthError::Revoked));
    }
}
