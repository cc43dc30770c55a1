//! Shared building blocks for the workspace crates: logging bootstrap and
//! the response envelope returned by every HTTP endpoint.

pub mod types;
pub mod utils;

pub use types::{ApiEnvelope, Health};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_type_ok() {
        let h = types::Health { status: "ok" };
        assert_eq!(h.status, "ok");
    }
}
