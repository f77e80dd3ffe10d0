use std::fmt;

use super::context::AuthorizationContext;

/// An additional requirement evaluated after the token has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Role(String),
    RoleInOrganization { role: String, organization_id: String },
    RoleInProject { project_id: String, role: String },
}

impl Check {
    pub fn with_role(role: impl Into<String>) -> Self {
        Check::Role(role.into())
    }

    pub fn with_role_in_organization(role: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Check::RoleInOrganization {
            role: role.into(),
            organization_id: organization_id.into(),
        }
    }

    pub fn with_role_in_project(project_id: impl Into<String>, role: impl Into<String>) -> Self {
        Check::RoleInProject {
            project_id: project_id.into(),
            role: role.into(),
        }
    }

    /// Returns the denial reason when the context does not satisfy the check.
    pub fn evaluate<T: AuthorizationContext>(&self, ctx: &T) -> Result<(), String> {
        let granted = match self {
            Check::Role(role) => ctx.is_granted_role(role),
            Check::RoleInOrganization { role, organization_id } => ctx.is_granted_role_in_organization(role, organization_id),
            Check::RoleInProject { project_id, role } => ctx.is_granted_role_in_project(project_id, role),
        };
        if granted { Ok(()) } else { Err(self.to_string()) }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Role(role) => write!(f, "missing required role: `{role}`"),
            Check::RoleInOrganization { role, organization_id } => {
                write!(f, "missing required role: `{role}` in organization `{organization_id}`")
            }
            Check::RoleInProject { project_id, role } => {
                write!(f, "missing required role: `{role}` in project `{project_id}`")
            }
        }
    }
}
