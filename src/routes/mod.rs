pub mod audit_log;
pub mod conversations;
pub mod forms;
pub mod health;
pub mod metrics;
pub mod patients;
pub mod profiles;
pub mod protocols;
pub mod session;
pub mod tasks;

use crate::{error::AppError, models::auth::TenantContext};

/// Clinical staff and administrators.
pub(crate) fn require_staff(ctx: &TenantContext) -> Result<(), AppError> {
    if ctx.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Staff access required"))
    }
}

pub(crate) fn require_admin(ctx: &TenantContext) -> Result<(), AppError> {
    if ctx.role.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Administrator access required"))
    }
}
