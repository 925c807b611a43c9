//! Device binding reset.

use crate::model::License;
use crate::store::LedgerStore;
use crate::LedgerError;

/// Clear a key's device binding and consume one reset.
///
/// Refused with `HwidResetLimit` once the quota is spent, unless
/// `override_quota` is set (top-operator requests). The quota check and the
/// write happen in one atomic update.
pub fn reset_device(
    store: &dyn LedgerStore,
    key: &str,
    override_quota: bool,
) -> Result<License, LedgerError> {
    let license = store.update_license(key, &mut |l| {
        if !override_quota && !l.has_reset_quota() {
            return Err(LedgerError::HwidResetLimit {
                used: l.hwid_resets_used,
                max: l.max_hwid_resets,
            });
        }
        l.hwid = None;
        l.hwid_resets_used = l.hwid_resets_used.saturating_add(1);
        Ok(())
    })?;
    tracing::info!(
        key = %key,
        used = license.hwid_resets_used,
        max = license.max_hwid_resets,
        "device binding reset"
    );
    Ok(license)
}
