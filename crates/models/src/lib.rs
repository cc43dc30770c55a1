pub mod errors;
pub mod db;
pub mod business;
pub mod property;
pub mod user;
pub mod user_credentials;
pub mod property_access;
pub mod code_reservation;

#[cfg(test)]
mod tests;
