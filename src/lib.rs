#![forbid(unsafe_code)]

//! Shared building blocks for the portfolio backend binary.

pub mod config;
pub mod models;
pub mod ratings;
pub mod security;
pub mod store;
pub mod upstream;
pub mod youtube;
