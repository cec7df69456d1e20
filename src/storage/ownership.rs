// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement with existence masking.
//!
//! A record owned by someone else is reported exactly like a missing one
//! (`CoreError::NotFound`), so callers cannot probe for other users' ids.

use crate::error::{CoreError, CoreResult};

/// Trait for resources that have an owner.
pub trait OwnedResource {
    /// Get the owner's user ID.
    fn owner_user_id(&self) -> &str;
}

/// Resolve a lookup result to a resource the caller owns.
pub trait OwnershipCheck<T> {
    fn owned_by(self, user_id: &str) -> CoreResult<T>;
}

impl<T: OwnedResource> OwnershipCheck<T> for Option<T> {
    fn owned_by(self, user_id: &str) -> CoreResult<T> {
        match self {
            Some(resource) if resource.owner_user_id() == user_id => Ok(resource),
            _ => Err(CoreError::NotFound),
        }
    }
}
