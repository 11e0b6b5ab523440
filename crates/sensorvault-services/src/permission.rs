use sensorvault_core::{Access, AppError, AppResult, DeviceId, Principal};
use sensorvault_db::PermissionSource;
use std::sync::Arc;

/// Decides whether a principal may read or write a device's data
#[derive(Clone)]
pub struct PermissionGate {
    source: Arc<dyn PermissionSource>,
}

impl PermissionGate {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self { source }
    }

    /// Admins always pass. Everyone else needs an active binding whose level covers `required`.
    ///
    /// A missing binding is reported as `Forbidden`, never `NotFound`.
    pub async fn authorize(
        &self,
        principal: &Principal,
        dev_id: DeviceId,
        required: Access,
    ) -> AppResult<()> {
        if principal.is_admin() {
            return Ok(());
        }

        let allowed = self
            .source
            .binding(principal.uid, dev_id)
            .await?
            .map(|binding| binding.is_active && binding.permission_level.allows(required))
            .unwrap_or(false);

        if allowed {
            Ok(())
        } else {
            tracing::debug!(uid = principal.uid, dev_id = %dev_id, %required, "Permission denied");
            Err(AppError::Forbidden(format!(
                "No {} permission on device {}",
                required, dev_id
            )))
        }
    }
}
