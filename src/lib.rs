#![forbid(unsafe_code)]

//! Whop-gated YouTube download service.

pub mod access;
pub mod api;
pub mod config;
pub mod quality;
pub mod retrieval;
pub mod validator;
