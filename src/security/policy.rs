//! Authorization table for the user directory.
//!
//! | Operation   | Allowed for                         |
//! |-------------|-------------------------------------|
//! | Create      | anyone, including anonymous callers |
//! | ReadById    | Admin, or the record's owner        |
//! | ReadByName  | Admin                               |
//! | ListAll     | Admin                               |
//! | Update      | Admin, or the record's owner        |
//! | Delete      | Admin                               |
//! | ReadVersion | any authenticated caller            |

use std::fmt;

use crate::security::token::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    ReadById,
    ReadByName,
    ListAll,
    Update,
    Delete,
    ReadVersion,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::ReadById => "read_by_id",
            Operation::ReadByName => "read_by_name",
            Operation::ListAll => "list_all",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::ReadVersion => "read_version",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Unauthenticated,
    AdminRequired,
    NotOwnerOrAdmin,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::Unauthenticated => "authentication required",
            DenyReason::AdminRequired => "admin role required",
            DenyReason::NotOwnerOrAdmin => "caller is neither the owner nor an admin",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decide whether `principal` may perform `op` on the record owned by
/// `resource_owner_id`. Owner ids are compared as exact strings.
pub fn authorize(
    op: Operation,
    resource_owner_id: Option<&str>,
    principal: Option<&Principal>,
) -> AccessDecision {
    if op == Operation::Create {
        return AccessDecision::Allow;
    }

    let Some(principal) = principal else {
        return AccessDecision::Deny(DenyReason::Unauthenticated);
    };

    let is_owner = resource_owner_id.is_some_and(|owner| owner == principal.subject_id());

    match op {
        Operation::Create | Operation::ReadVersion => AccessDecision::Allow,
        Operation::ReadById | Operation::Update => {
            if principal.is_admin() || is_owner {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::NotOwnerOrAdmin)
            }
        }
        Operation::ReadByName | Operation::ListAll | Operation::Delete => {
            if principal.is_admin() {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::AdminRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_OPS: [Operation; 7] = [
        Operation::Create,
        Operation::ReadById,
        Operation::ReadByName,
        Operation::ListAll,
        Operation::Update,
        Operation::Delete,
        Operation::ReadVersion,
    ];

    const OWNER: &str = "7d1c0e52-61b7-4c43-9b0a-5d2f8e3c9a10";
    const OTHER: &str = "0b6e3a7f-2c5d-4e8b-a1f9-3c7d2e6b8a04";

    fn user(subject: &str) -> Principal {
        Principal::new(subject, Vec::<String>::new())
    }

    fn admin(subject: &str) -> Principal {
        Principal::new(subject, ["Admin"])
    }

    #[test]
    fn create_is_always_allowed() {
        let p = user(OTHER);
        for principal in [None, Some(&p)] {
            for owner in [None, Some(OWNER)] {
                assert_eq!(
                    authorize(Operation::Create, owner, principal),
                    AccessDecision::Allow
                );
            }
        }
    }

    #[test]
    fn anonymous_denied_everything_but_create() {
        for op in ALL_OPS.into_iter().filter(|op| *op != Operation::Create) {
            assert_eq!(
                authorize(op, Some(OWNER), None),
                AccessDecision::Deny(DenyReason::Unauthenticated),
                "{op}"
            );
        }
    }

    #[test]
    fn admin_allowed_everything() {
        let p = admin(OTHER);
        for op in ALL_OPS {
            assert!(authorize(op, Some(OWNER), Some(&p)).is_allowed(), "{op}");
            assert!(authorize(op, None, Some(&p)).is_allowed(), "{op}");
        }
    }

    #[test]
    fn owner_may_read_and_update_self_regardless_of_role() {
        for p in [user(OWNER), Principal::new(OWNER, ["User"]), admin(OWNER)] {
            assert!(authorize(Operation::ReadById, Some(OWNER), Some(&p)).is_allowed());
            assert!(authorize(Operation::Update, Some(OWNER), Some(&p)).is_allowed());
        }
    }

    #[test]
    fn non_admin_non_owner_denied_update_and_read() {
        let p = Principal::new(OTHER, ["User", "Auditor"]);
        for op in [Operation::ReadById, Operation::Update] {
            assert_eq!(
                authorize(op, Some(OWNER), Some(&p)),
                AccessDecision::Deny(DenyReason::NotOwnerOrAdmin)
            );
            assert_eq!(
                authorize(op, None, Some(&p)),
                AccessDecision::Deny(DenyReason::NotOwnerOrAdmin)
            );
        }
    }

    #[test]
    fn owner_without_admin_cannot_delete_or_list() {
        let p = user(OWNER);
        for op in [Operation::Delete, Operation::ListAll, Operation::ReadByName] {
            assert_eq!(
                authorize(op, Some(OWNER), Some(&p)),
                AccessDecision::Deny(DenyReason::AdminRequired),
                "{op}"
            );
        }
    }

    #[test]
    fn ownership_comparison_is_case_sensitive() {
        let p = user(&OWNER.to_uppercase());
        assert!(!authorize(Operation::ReadById, Some(OWNER), Some(&p)).is_allowed());
    }

    #[test]
    fn version_needs_only_authentication() {
        let p = user(OTHER);
        assert!(authorize(Operation::ReadVersion, None, Some(&p)).is_allowed());
    }
}
