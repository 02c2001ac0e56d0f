//! Application verify callbacks

use std::sync::Arc;

use super::context::StoreContext;
use super::error::VerifyErrorCode;
use crate::error::Result;
use crate::registry::guarded;

/// Trust policy applied once per verified chain.
///
/// Receives the completed [`StoreContext`] and returns whether to accept the
/// chain. Returning `true` for a chain that failed verification overrides
/// the failure.
pub type VerifyCallback = Arc<dyn Fn(&StoreContext) -> bool + Send + Sync>;

/// Run `callback` against a verified context.
///
/// A rejection of an otherwise valid chain is recorded on the context as
/// [`VerifyErrorCode::ApplicationVerification`]. A panic is recorded as the
/// context's exception and returned as `CallbackPanic`.
pub fn invoke_verify_callback(
    callback: &(dyn Fn(&StoreContext) -> bool + Send + Sync),
    context: &StoreContext,
) -> Result<bool> {
    let preverified = context.verify_result()? == 1;
    let accepted = match guarded("verify", || callback(context)) {
        Ok(accepted) => accepted,
        Err(panic) => {
            context.set_exception(panic.clone())?;
            return Err(panic);
        }
    };

    if preverified && !accepted {
        context.set_error(VerifyErrorCode::ApplicationVerification, 0)?;
    } else if !preverified && accepted {
        tracing::debug!(
            "verify callback accepted a chain that failed with {}",
            context.error()?
        );
    }
    Ok(accepted)
}
