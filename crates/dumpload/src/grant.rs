// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Effective permissions of the credential a dump or load runs under

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{AccessType, GrantScope, StorageLocation};

/// Operations a grant permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub list: bool,
}

impl Permissions {
    pub const ALL: Permissions = Permissions {
        read: true,
        write: true,
        list: true,
    };

    /// Permissions of a PAR created with `access`, with or without `ListObjects`
    pub fn from_access_type(access: AccessType, list_objects: bool) -> Self {
        Self {
            read: access.can_read(),
            write: access.can_write(),
            list: list_objects,
        }
    }
}

/// What a dump or load is authorized to do at its root location
///
/// Permissions are either declared up front, and checked locally before
/// any storage call, or unknown, in which case the storage calls are the
/// probe and their refusals surface as storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub scope: GrantScope,
    pub permissions: Option<Permissions>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// The grant implied by a location: full access to a local directory,
    /// unknown permissions for a PAR
    pub fn for_location(location: &StorageLocation) -> Self {
        Self {
            scope: location.scope(),
            permissions: (!location.is_par()).then_some(Permissions::ALL),
            expires_at: None,
        }
    }

    /// A PAR grant whose access type is known
    pub fn declared(location: &StorageLocation, access: AccessType, list_objects: bool) -> Self {
        Self {
            scope: location.scope(),
            permissions: Some(Permissions::from_access_type(access, list_objects)),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    fn check_expiry(&self, location: &StorageLocation, now: DateTime<Utc>) -> Result<()> {
        match self.expires_at {
            Some(expires_at) if expires_at <= now => Err(Error::GrantExpired {
                location: location.to_string(),
                expired_at: expires_at.to_rfc3339(),
            }),
            _ => Ok(()),
        }
    }

    /// A load needs read and list; write is never required
    pub fn check_load(&self, location: &StorageLocation, now: DateTime<Utc>) -> Result<()> {
        self.check_expiry(location, now)?;
        let Some(permissions) = self.permissions else {
            return Ok(());
        };
        if !permissions.read {
            return Err(Error::AccessDenied {
                operation: "read",
                message: "Not Found".to_string(),
            });
        }
        if !permissions.list {
            let message = match location {
                StorageLocation::Par(par) => format!(
                    "Either the bucket named '{}' does not exist in the namespace '{}' or you are not authorized to access it",
                    par.bucket(),
                    par.namespace()
                ),
                StorageLocation::Local(_) => format!("Not Found: cannot list {location}"),
            };
            return Err(Error::AccessDenied {
                operation: "list",
                message,
            });
        }
        Ok(())
    }

    pub fn check_dump(&self, location: &StorageLocation, now: DateTime<Utc>) -> Result<()> {
        self.check_expiry(location, now)?;
        match self.permissions {
            Some(permissions) if !permissions.write => Err(Error::AccessDenied {
                operation: "write",
                message: format!("Forbidden: the access grant for {location} does not permit writes"),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;
    use chrono::Duration;

    const PAR: &str = "https://objectstorage.example.com/p/GrAnTtOkEn/n/tenancy/b/dumps/o/";

    fn location() -> StorageLocation {
        StorageLocation::parse(PAR).expect("parse")
    }

    fn load_result(access: AccessType, list: bool) -> Result<()> {
        AccessGrant::declared(&location(), access, list).check_load(&location(), Utc::now())
    }

    #[test]
    fn test_load_permission_matrix() {
        assert!(load_result(AccessType::AnyObjectRead, true).is_ok());
        assert!(load_result(AccessType::AnyObjectReadWrite, true).is_ok());

        let err = load_result(AccessType::AnyObjectWrite, false).expect_err("write only");
        assert_eq!(err.to_string(), "Not Found");
        assert_eq!(err.class(), ErrorClass::Authorization);

        let err = load_result(AccessType::AnyObjectWrite, true).expect_err("write and list");
        assert_eq!(err.to_string(), "Not Found");

        let err = load_result(AccessType::AnyObjectRead, false).expect_err("no listing");
        assert_eq!(
            err.to_string(),
            "Either the bucket named 'dumps' does not exist in the namespace 'tenancy' or you are not authorized to access it"
        );
    }

    #[test]
    fn test_unknown_permissions_defer_to_storage() {
        let grant = AccessGrant::for_location(&location());
        assert!(grant.permissions.is_none());
        assert!(grant.check_load(&location(), Utc::now()).is_ok());
        assert!(grant.check_dump(&location(), Utc::now()).is_ok());
    }

    #[test]
    fn test_expired_grant_fails_immediately() {
        let now = Utc::now();
        let grant = AccessGrant::declared(&location(), AccessType::AnyObjectReadWrite, true)
            .with_expiry(now - Duration::minutes(1));
        let err = grant.check_load(&location(), now).expect_err("expired");
        assert_eq!(err.class(), ErrorClass::Authorization);
        assert!(!err.to_string().contains("GrAnTtOkEn"));
    }

    #[test]
    fn test_dump_needs_write() {
        let grant = AccessGrant::declared(&location(), AccessType::AnyObjectRead, true);
        let err = grant.check_dump(&location(), Utc::now()).expect_err("read only");
        assert!(err.to_string().starts_with("Forbidden"));
        assert!(!err.to_string().contains("GrAnTtOkEn"));
    }
}
