//! Podium Core
//!
//! Core types and abstractions for the Podium competition-agent platform.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, Outcome, resource profiles)
//! - DTOs: Data transfer objects used by the API gateway

pub mod domain;
pub mod dto;
