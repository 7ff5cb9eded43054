// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Storefront auth: resolve the signed-in user's profile.
//!
//! Auth and profile rows live in a hosted backend. This crate turns auth
//! events into a stream of users for the storefront UI, publishing a
//! metadata-derived fallback at once and replacing it with the stored
//! profile when the backend has it.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

pub use error::{AuthError, Result};
pub use models::{AuthPrincipal, Profile, ResolvedUser, Role};
pub use services::{AuthEvent, AuthSession, ProfileResolver};
