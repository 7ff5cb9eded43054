// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod principal;
pub mod profile;

pub use principal::{
    AuthPrincipal, OAuthCredential, Session, SignUp, SignUpRequest, UserMetadata,
};
pub use profile::{Profile, ProfileRow, ProfileSource, ResolvedUser, Role};
