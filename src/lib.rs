// OAuth Keeper - Library root for testing

pub mod auth;
pub mod callback;
pub mod config;
pub mod error;
pub mod login;
pub mod middleware;
pub mod routes;
