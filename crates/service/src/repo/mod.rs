//! Durable `TenantRepository` implementations.

pub mod seaorm;

pub use seaorm::SeaOrmTenantRepository;
