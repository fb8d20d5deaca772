#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Actor scoping for the kernel: which tenant an event belongs to, and what
//! the acting user is permitted to do. Firm/company directory management
//! and invite flows are a layer above this kernel and out of scope here.

use std::collections::HashSet;

use thiserror::Error;

pub type TenantId = String;
pub type LedgerId = String;
pub type UserId = String;

pub type TenancyResult<T> = Result<T, TenancyError>;

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("actor {actor_id} lacks capability {capability} in tenant {tenant_id}")]
    Forbidden {
        actor_id: UserId,
        tenant_id: TenantId,
        capability: &'static str,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Partner,
    Senior,
    Staff,
    Auditor,
}

impl Role {
    #[must_use]
    pub fn can_post_journal_entries(self) -> bool {
        matches!(self, Role::Partner | Role::Senior | Role::Staff)
    }

    #[must_use]
    pub fn can_approve(self) -> bool {
        matches!(self, Role::Partner | Role::Senior)
    }

    #[must_use]
    pub fn can_manage_periods(self) -> bool {
        matches!(self, Role::Partner)
    }

    #[must_use]
    pub fn read_only(self) -> bool {
        matches!(self, Role::Auditor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleScope {
    TenantWide,
    Ledger(LedgerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleAssignment {
    pub role: Role,
    pub scope: RoleScope,
}

impl RoleAssignment {
    #[must_use]
    pub fn tenant_wide(role: Role) -> Self {
        Self {
            role,
            scope: RoleScope::TenantWide,
        }
    }

    #[must_use]
    pub fn ledger(role: Role, ledger_id: LedgerId) -> Self {
        Self {
            role,
            scope: RoleScope::Ledger(ledger_id),
        }
    }

    fn applies_to(&self, ledger_id: &str) -> bool {
        match &self.scope {
            RoleScope::TenantWide => true,
            RoleScope::Ledger(scoped) => scoped == ledger_id,
        }
    }
}

/// The identity an operation runs as: who, for which tenant, with which
/// roles. Carried by the coordinator and checked before any state-affecting
/// call (spec §5, actor_id on every audit record and journal entry).
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub actor_id: UserId,
    roles: Vec<RoleAssignment>,
}

impl TenantContext {
    pub fn new(
        tenant_id: TenantId,
        actor_id: UserId,
        roles: Vec<RoleAssignment>,
    ) -> TenancyResult<Self> {
        if roles.is_empty() {
            return Err(TenancyError::Validation(
                "at least one role assignment is required".into(),
            ));
        }
        let mut dedup = HashSet::new();
        for assignment in &roles {
            if !dedup.insert(assignment.clone()) {
                return Err(TenancyError::Validation(
                    "duplicate role assignment detected".into(),
                ));
            }
        }
        Ok(Self {
            tenant_id,
            actor_id,
            roles,
        })
    }

    #[must_use]
    pub fn roles_for(&self, ledger_id: &str) -> Vec<Role> {
        self.roles
            .iter()
            .filter(|assignment| assignment.applies_to(ledger_id))
            .map(|assignment| assignment.role)
            .collect()
    }

    #[must_use]
    pub fn can_post_to(&self, ledger_id: &str) -> bool {
        self.roles_for(ledger_id)
            .into_iter()
            .any(Role::can_post_journal_entries)
    }

    #[must_use]
    pub fn can_approve_in(&self, ledger_id: &str) -> bool {
        self.roles_for(ledger_id).into_iter().any(Role::can_approve)
    }

    #[must_use]
    pub fn can_manage_periods_in(&self, ledger_id: &str) -> bool {
        self.roles_for(ledger_id)
            .into_iter()
            .any(Role::can_manage_periods)
    }

    pub fn require_can_post_to(&self, ledger_id: &str) -> TenancyResult<()> {
        if self.can_post_to(ledger_id) {
            Ok(())
        } else {
            Err(TenancyError::Forbidden {
                actor_id: self.actor_id.clone(),
                tenant_id: self.tenant_id.clone(),
                capability: "can_post_journal_entries",
            })
        }
    }
}
