// ============================
// crates/backend-lib/src/auth/policy.rs
// ============================
//! Role-based permissions. Every check is an exhaustive match on [`ActorRole`].
use crate::error::AppError;
use campus_safety_common::{Actor, ActorRole};

/// Actions gated by role rather than ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    RecogniseSos,
    AcknowledgeSos,
    ResolveSos,
    /// Read any SOS, the active feed and history
    MonitorSos,
    /// Update details on somebody else's SOS
    EditAnySos,
    AssignEscort,
    MessageWalk,
    /// Read or update any safe walk and location
    MonitorWalks,
}

pub fn permits(role: ActorRole, permission: Permission) -> bool {
    match (role, permission) {
        (ActorRole::Admin, _) => true,
        (ActorRole::Security, Permission::RecogniseSos | Permission::ResolveSos) => true,
        (ActorRole::Security, Permission::AcknowledgeSos | Permission::EditAnySos) => false,
        (ActorRole::Warden, Permission::AcknowledgeSos | Permission::ResolveSos) => true,
        (ActorRole::Warden, Permission::RecogniseSos | Permission::EditAnySos) => false,
        (
            ActorRole::Security | ActorRole::Warden,
            Permission::MonitorSos
            | Permission::AssignEscort
            | Permission::MessageWalk
            | Permission::MonitorWalks,
        ) => true,
        (ActorRole::Student, _) => false,
    }
}

/// Fail with `PermissionDenied` unless the actor's role grants `permission`
pub fn require(actor: &Actor, permission: Permission) -> Result<(), AppError> {
    if permits(actor.role, permission) {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(format!(
            "{} may not {permission:?}",
            actor.role
        )))
    }
}

/// Owner of the resource, or a role that grants `permission`
pub fn require_owner_or(
    actor: &Actor,
    owner_id: &str,
    permission: Permission,
) -> Result<(), AppError> {
    if actor.id == owner_id {
        return Ok(());
    }
    require(actor, permission)
}

/// Strictly the owner of the resource
pub fn require_owner(actor: &Actor, owner_id: &str) -> Result<(), AppError> {
    if actor.id == owner_id {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(
            "only the owner may do this".to_string(),
        ))
    }
}
