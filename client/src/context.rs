//! Tenant session identity.

use tabsync_engine::{Error, Record, TenantId};

/// Identity of the active tenant session.
///
/// Passed by reference into every store, queue and remote call; a session
/// switch builds a new context rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Reject records that belong to another tenant.
    pub fn check(&self, record: &Record) -> Result<(), Error> {
        self.check_tenant(&record.tenant_id)
    }

    pub fn check_tenant(&self, tenant_id: &str) -> Result<(), Error> {
        if tenant_id == self.tenant_id {
            Ok(())
        } else {
            Err(Error::TenantMismatch {
                expected: self.tenant_id.clone(),
                actual: tenant_id.to_string(),
            })
        }
    }
}
