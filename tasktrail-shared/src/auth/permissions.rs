/// Permission evaluator
///
/// Decides whether a caller may perform an action on a resource. The
/// decision depends only on its inputs and a static table, so the same
/// inputs always produce the same answer.
///
/// # Evaluation Order
///
/// 1. **Organization boundary**: a resource outside the caller's organization
///    is denied, whatever the role
/// 2. **Known action**: actions missing from the table are denied
/// 3. **Role threshold**: the caller's role must meet the table minimum
///
/// # Example
///
/// ```
/// use tasktrail_shared::auth::permissions::{authorize, Action, Decision, ResourceKind, Verb};
/// use tasktrail_shared::models::user::Role;
/// use uuid::Uuid;
///
/// let org = Uuid::new_v4();
/// let delete_task = Action::new(ResourceKind::Task, Verb::Delete);
///
/// assert_eq!(authorize(Role::Manager, delete_task, org, org), Decision::Allow);
/// assert!(authorize(Role::Employee, delete_task, org, org).is_deny());
/// assert!(authorize(Role::Owner, delete_task, Uuid::new_v4(), org).is_deny());
/// ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::identity::CallerIdentity;
use crate::models::user::Role;

/// Kinds of resources that carry permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Organization,
    User,
    Task,
    Sprint,
    Event,
    Comment,
    Attachment,
    AuditLog,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Organization,
        ResourceKind::User,
        ResourceKind::Task,
        ResourceKind::Sprint,
        ResourceKind::Event,
        ResourceKind::Comment,
        ResourceKind::Attachment,
        ResourceKind::AuditLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Organization => "organization",
            ResourceKind::User => "user",
            ResourceKind::Task => "task",
            ResourceKind::Sprint => "sprint",
            ResourceKind::Event => "event",
            ResourceKind::Comment => "comment",
            ResourceKind::Attachment => "attachment",
            ResourceKind::AuditLog => "audit_log",
        }
    }

}

impl FromStr for ResourceKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownName::new("resource type", s))
    }
}

/// Operations performed on resources; also the audit `action` vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    View,
    Create,
    Update,
    StatusChange,
    Delete,
    RoleChange,
    Deactivate,
    Export,
    Login,
}

impl Verb {
    pub const ALL: [Verb; 9] = [
        Verb::View,
        Verb::Create,
        Verb::Update,
        Verb::StatusChange,
        Verb::Delete,
        Verb::RoleChange,
        Verb::Deactivate,
        Verb::Export,
        Verb::Login,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::View => "view",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::StatusChange => "status_change",
            Verb::Delete => "delete",
            Verb::RoleChange => "role_change",
            Verb::Deactivate => "deactivate",
            Verb::Export => "export",
            Verb::Login => "login",
        }
    }

}

impl FromStr for Verb {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or_else(|| UnknownName::new("action", s))
    }
}

/// A resource type or verb name outside the vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} '{name}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

impl UnknownName {
    fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}

/// A verb applied to a resource kind, written `resource:verb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    pub resource: ResourceKind,
    pub verb: Verb,
}

impl Action {
    pub const fn new(resource: ResourceKind, verb: Verb) -> Self {
        Self { resource, verb }
    }

    /// Parses `resource:verb`
    ///
    /// Returns None for anything that doesn't name a known resource and verb.
    /// A parsed action may still be unknown to the permission table.
    pub fn parse(s: &str) -> Option<Self> {
        let (resource, verb) = s.split_once(':')?;
        Some(Self::new(resource.parse().ok()?, verb.parse().ok()?))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource.as_str(), self.verb.as_str())
    }
}

use ResourceKind as R;
use Role::{Employee, Manager, Owner};
use Verb as V;

/// Minimum role per action; anything absent is unknown
const PERMISSION_TABLE: &[(ResourceKind, Verb, Role)] = &[
    (R::Organization, V::View, Employee),
    (R::Organization, V::Update, Owner),
    (R::User, V::View, Manager),
    (R::User, V::Create, Manager),
    (R::User, V::Update, Manager),
    (R::User, V::RoleChange, Manager),
    (R::User, V::Deactivate, Manager),
    (R::Task, V::View, Employee),
    (R::Task, V::Create, Employee),
    (R::Task, V::Update, Employee),
    (R::Task, V::StatusChange, Employee),
    (R::Task, V::Delete, Manager),
    (R::Sprint, V::View, Employee),
    (R::Sprint, V::Create, Manager),
    (R::Sprint, V::Update, Manager),
    (R::Sprint, V::StatusChange, Manager),
    (R::Sprint, V::Delete, Manager),
    (R::Event, V::View, Employee),
    (R::Event, V::Create, Employee),
    (R::Event, V::Update, Manager),
    (R::Event, V::Delete, Manager),
    (R::Comment, V::View, Employee),
    (R::Comment, V::Create, Employee),
    (R::Comment, V::Update, Employee),
    (R::Comment, V::Delete, Manager),
    (R::Attachment, V::View, Employee),
    (R::Attachment, V::Create, Employee),
    (R::Attachment, V::Delete, Manager),
    (R::AuditLog, V::View, Manager),
    (R::AuditLog, V::Export, Manager),
];

/// Looks up the minimum role for an action
pub fn min_role(action: Action) -> Option<Role> {
    PERMISSION_TABLE
        .iter()
        .find(|(resource, verb, _)| *resource == action.resource && *verb == action.verb)
        .map(|(_, _, role)| *role)
}

/// Every action the table knows about, in table order
pub fn known_actions() -> impl Iterator<Item = Action> {
    PERMISSION_TABLE
        .iter()
        .map(|(resource, verb, _)| Action::new(*resource, *verb))
}

/// Why a request was denied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    /// Resource belongs to a different organization
    #[error("Resource belongs to organization {resource_org}, caller belongs to {caller_org}")]
    CrossOrganizationAccess { resource_org: Uuid, caller_org: Uuid },

    /// Caller's role is below the requirement
    #[error("Insufficient role: requires {required}, has {actual}")]
    InsufficientRole { required: Role, actual: Role },

    /// Action is not in the permission table
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl DenyReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::CrossOrganizationAccess { .. } => "cross_organization_access",
            DenyReason::InsufficientRole { .. } => "insufficient_role",
            DenyReason::UnknownAction(_) => "unknown_action",
        }
    }
}

/// Result of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn is_deny(&self) -> bool {
        !self.is_allow()
    }

    /// Converts into a `Result`, for `?` at call sites
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Evaluates an authorization request
///
/// The organization check runs first, so a cross-organization request is
/// reported as such even when the action is unknown or the role too low.
pub fn authorize(role: Role, action: Action, resource_org: Uuid, caller_org: Uuid) -> Decision {
    if resource_org != caller_org {
        return Decision::Deny(DenyReason::CrossOrganizationAccess {
            resource_org,
            caller_org,
        });
    }

    let Some(required) = min_role(action) else {
        return Decision::Deny(DenyReason::UnknownAction(action.to_string()));
    };

    if role.has_permission(&required) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::InsufficientRole {
            required,
            actual: role,
        })
    }
}

/// Evaluates an action given as `resource:verb` text
///
/// Text that doesn't parse is treated like any other unknown action.
pub fn authorize_str(role: Role, action: &str, resource_org: Uuid, caller_org: Uuid) -> Decision {
    if resource_org != caller_org {
        return Decision::Deny(DenyReason::CrossOrganizationAccess {
            resource_org,
            caller_org,
        });
    }

    match Action::parse(action) {
        Some(parsed) => authorize(role, parsed, resource_org, caller_org),
        None => Decision::Deny(DenyReason::UnknownAction(action.to_string())),
    }
}

/// Authorizes a caller and logs the denial
///
/// Denials are logged at WARN and never written to the audit log.
///
/// # Errors
///
/// Returns the [`DenyReason`] when the request is denied.
pub fn require(
    caller: &CallerIdentity,
    action: Action,
    resource_org: Uuid,
    resource_id: Option<Uuid>,
) -> Result<(), DenyReason> {
    let decision = authorize(caller.role, action, resource_org, caller.organization_id);

    if let Decision::Deny(reason) = &decision {
        tracing::warn!(
            user_id = %caller.user_id,
            organization_id = %caller.organization_id,
            role = %caller.role,
            action = %action,
            resource_org = %resource_org,
            resource_id = ?resource_id,
            reason = reason.code(),
            "Authorization denied"
        );
    }

    decision.into_result()
}

/// Checks that a referenced resource lives in the caller's organization
///
/// Used for foreign references in request bodies (an assignee, a sprint)
/// where no role threshold applies.
pub fn require_same_organization(caller: &CallerIdentity, resource_org: Uuid) -> Result<(), DenyReason> {
    if resource_org == caller.organization_id {
        return Ok(());
    }

    tracing::warn!(
        user_id = %caller.user_id,
        organization_id = %caller.organization_id,
        resource_org = %resource_org,
        "Cross-organization reference rejected"
    );

    Err(DenyReason::CrossOrganizationAccess {
        resource_org,
        caller_org: caller.organization_id,
    })
}

/// Checks a role assignment on top of `user:role_change`
///
/// - nobody grants a role above their own
/// - the owner role is granted only by owners
/// - nobody changes an account whose current role is above their own
pub fn check_role_assignment(
    caller: &CallerIdentity,
    target_current_role: Role,
    new_role: Role,
) -> Result<(), DenyReason> {
    check_can_manage(caller, target_current_role)?;

    if !caller.role.has_permission(&new_role) || (new_role == Role::Owner && caller.role != Role::Owner) {
        return Err(DenyReason::InsufficientRole {
            required: new_role,
            actual: caller.role,
        });
    }

    Ok(())
}

/// Checks that the caller outranks or equals the target account's role
///
/// Guards deactivation and profile edits of other users.
pub fn check_can_manage(caller: &CallerIdentity, target_role: Role) -> Result<(), DenyReason> {
    if caller.role.has_permission(&target_role) {
        Ok(())
    } else {
        Err(DenyReason::InsufficientRole {
            required: target_role,
            actual: caller.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> CallerIdentity {
        CallerIdentity {
            user_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn test_action_display_and_parse() {
        let action = Action::new(ResourceKind::Task, Verb::StatusChange);
        assert_eq!(action.to_string(), "task:status_change");
        assert_eq!(Action::parse("task:status_change"), Some(action));
        assert_eq!(
            Action::parse("audit_log:export"),
            Some(Action::new(ResourceKind::AuditLog, Verb::Export))
        );

        assert_eq!(Action::parse("task"), None);
        assert_eq!(Action::parse("task:fly"), None);
        assert_eq!(Action::parse("rocket:create"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn test_vocabulary_parses_through_from_str() {
        for verb in Verb::ALL {
            assert_eq!(verb.as_str().parse::<Verb>(), Ok(verb));
        }
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }

        let err = "explode".parse::<Verb>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown action 'explode'");
        let err = "Task".parse::<ResourceKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown resource type 'Task'");
    }

    #[test]
    fn test_table_entries() {
        let task = |v| Action::new(ResourceKind::Task, v);
        let sprint = |v| Action::new(ResourceKind::Sprint, v);

        assert_eq!(min_role(task(Verb::Create)), Some(Role::Employee));
        assert_eq!(min_role(task(Verb::Delete)), Some(Role::Manager));
        assert_eq!(min_role(sprint(Verb::Delete)), Some(Role::Manager));
        assert_eq!(
            min_role(Action::new(ResourceKind::Organization, Verb::Update)),
            Some(Role::Owner)
        );
        assert_eq!(
            min_role(Action::new(ResourceKind::AuditLog, Verb::View)),
            Some(Role::Manager)
        );
    }

    #[test]
    fn test_table_has_no_duplicates() {
        let actions: Vec<Action> = known_actions().collect();
        for (i, a) in actions.iter().enumerate() {
            assert!(!actions[i + 1..].contains(a), "duplicate entry for {}", a);
        }
    }

    #[test]
    fn test_login_and_export_of_tasks_are_unknown() {
        assert_eq!(min_role(Action::new(ResourceKind::User, Verb::Login)), None);
        assert_eq!(min_role(Action::new(ResourceKind::Task, Verb::Export)), None);
    }

    #[test]
    fn test_employee_creates_task() {
        let org = Uuid::new_v4();
        let decision = authorize(
            Role::Employee,
            Action::new(ResourceKind::Task, Verb::Create),
            org,
            org,
        );
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn test_employee_cannot_delete_sprint() {
        let org = Uuid::new_v4();
        let decision = authorize(
            Role::Employee,
            Action::new(ResourceKind::Sprint, Verb::Delete),
            org,
            org,
        );
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::InsufficientRole {
                required: Role::Manager,
                actual: Role::Employee,
            })
        );
    }

    #[test]
    fn test_owner_denied_across_organizations() {
        let resource_org = Uuid::new_v4();
        let caller_org = Uuid::new_v4();
        let decision = authorize(
            Role::Owner,
            Action::new(ResourceKind::Task, Verb::View),
            resource_org,
            caller_org,
        );
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::CrossOrganizationAccess {
                resource_org,
                caller_org,
            })
        );
    }

    #[test]
    fn test_unknown_action_fails_closed_for_owner() {
        let org = Uuid::new_v4();
        let decision = authorize(
            Role::Owner,
            Action::new(ResourceKind::Attachment, Verb::Update),
            org,
            org,
        );
        assert_eq!(
            decision,
            Decision::Deny(DenyReason::UnknownAction("attachment:update".to_string()))
        );
    }

    #[test]
    fn test_authorize_str() {
        let org = Uuid::new_v4();
        assert!(authorize_str(Role::Manager, "task:delete", org, org).is_allow());
        assert_eq!(
            authorize_str(Role::Owner, "task:teleport", org, org),
            Decision::Deny(DenyReason::UnknownAction("task:teleport".to_string()))
        );
        assert_eq!(
            authorize_str(Role::Owner, "nonsense", org, Uuid::new_v4()).into_result().unwrap_err().code(),
            "cross_organization_access"
        );
    }

    #[test]
    fn test_require_uses_caller_identity() {
        let manager = caller(Role::Manager);
        let delete = Action::new(ResourceKind::Task, Verb::Delete);

        assert!(require(&manager, delete, manager.organization_id, None).is_ok());
        assert_eq!(
            require(&manager, delete, Uuid::new_v4(), Some(Uuid::new_v4()))
                .unwrap_err()
                .code(),
            "cross_organization_access"
        );
    }

    #[test]
    fn test_require_same_organization() {
        let employee = caller(Role::Employee);
        assert!(require_same_organization(&employee, employee.organization_id).is_ok());
        assert!(require_same_organization(&employee, Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_role_assignment_rules() {
        let owner = caller(Role::Owner);
        let manager = caller(Role::Manager);

        assert!(check_role_assignment(&owner, Role::Employee, Role::Owner).is_ok());
        assert!(check_role_assignment(&owner, Role::Manager, Role::Employee).is_ok());
        assert!(check_role_assignment(&manager, Role::Employee, Role::Manager).is_ok());

        // Only owners hand out ownership
        assert_eq!(
            check_role_assignment(&manager, Role::Employee, Role::Owner),
            Err(DenyReason::InsufficientRole {
                required: Role::Owner,
                actual: Role::Manager,
            })
        );

        // Managers cannot demote owners
        assert!(check_role_assignment(&manager, Role::Owner, Role::Employee).is_err());
    }

    #[test]
    fn test_check_can_manage() {
        let manager = caller(Role::Manager);
        assert!(check_can_manage(&manager, Role::Employee).is_ok());
        assert!(check_can_manage(&manager, Role::Manager).is_ok());
        assert!(check_can_manage(&manager, Role::Owner).is_err());
    }

    #[test]
    fn test_deny_reason_codes() {
        assert_eq!(
            DenyReason::UnknownAction("x".to_string()).code(),
            "unknown_action"
        );
        assert_eq!(
            DenyReason::InsufficientRole {
                required: Role::Owner,
                actual: Role::Employee
            }
            .to_string(),
            "Insufficient role: requires owner, has employee"
        );
    }
}
