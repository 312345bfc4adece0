//! Sheep counter client
//!
//! Client library for the sheep counting image job service: an HTTP client
//! for submitting and reading jobs, and a job view controller that loads a
//! job with its recent history and polls it until processing finishes.

pub mod config;
pub mod models;
pub mod services;
pub mod view;
