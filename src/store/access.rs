//! Write rules applied by every store backend before touching data.

use crate::model::{DocumentKind, UserContext};
use crate::store::traits::{StoreError, StoreResult};

pub fn check_write(actor: &UserContext, kind: DocumentKind) -> StoreResult<()> {
    if actor.role.is_admin() {
        return Ok(());
    }
    Err(StoreError::PermissionDenied(format!(
        "user '{}' with role '{}' may not modify {} documents",
        actor.user_id, actor.role, kind
    )))
}

pub fn check_batch<I>(actor: &UserContext, kinds: I) -> StoreResult<()>
where
    I: IntoIterator<Item = DocumentKind>,
{
    for kind in kinds {
        check_write(actor, kind)?;
    }
    Ok(())
}
