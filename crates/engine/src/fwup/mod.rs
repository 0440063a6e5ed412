//! Co-processor firmware request adapters.
//!
//! Every family follows the same shape: build TSS parameters from the
//! build identity plus the device-reported info dictionary, send the
//! family-tagged request, resolve the component to extract, post-process
//! the payload the way the family's loader expects, and assemble a
//! response of family-prefixed ticket entries plus `FirmwareData`.
//! Concrete families differ only in those four steps.

pub mod rose;
pub mod savage;
pub mod se;
pub mod tcon;
pub mod timer;
pub mod veridian;
pub mod yonkers;

use log::warn;
use plist::{Dictionary, Value};
use restore_protocol::ftab::{Ftab, TAG_RKOS, TAG_RRKO};

use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss;

/// TSS parameters for a family request: identity-derived keys with the
/// device's info dictionary merged over them.
pub(crate) fn base_params(ctx: &SessionContext, info: &Dictionary) -> Dictionary {
    let mut params = tss::parameters_from_identity(&ctx.build_identity, &ctx.device);
    for (key, value) in info.iter() {
        let key: &str = key.as_ref();
        params.insert(key.into(), value.clone());
    }
    params
}

/// Production/security keys some families insist on.
pub(crate) fn add_ap_security(params: &mut Dictionary, image4_supported: bool) {
    params.insert("ApProductionMode".into(), Value::Boolean(true));
    params.insert("ApSecurityMode".into(), Value::Boolean(image4_supported));
    params.insert("ApSupportsImg4".into(), Value::Boolean(image4_supported));
}

/// A missing family ticket is suspicious but not fatal: the device
/// decides whether it can live with the response.
pub(crate) fn check_ticket(response: &Dictionary, key: &str) {
    if response.get(key).is_none() {
        warn!("TSS response is missing {key}");
    }
}

/// Response dictionary: every family-prefixed entry from the TSS
/// response, plus the firmware payload.
pub(crate) fn family_response(
    tss_response: &Dictionary,
    prefix: &str,
    firmware_data: Value,
) -> Dictionary {
    let mut out = Dictionary::new();
    for (key, value) in tss_response.iter() {
        let key: &str = key.as_ref();
        if key.starts_with(prefix) {
            out.insert(key.into(), value.clone());
        }
    }
    out.insert("FirmwareData".into(), firmware_data);
    out
}

pub(crate) fn expect_rkos(ftab: &Ftab) {
    if ftab.tag != TAG_RKOS {
        warn!("Firmware table is tagged {}, expected rkos", ftab.tag);
    }
}

/// Grafts the restore image's `rrko` entry into the runnable table, the
/// RTKit families' way of shipping both boot paths in one blob.
pub(crate) fn graft_restore_entry(
    primary: &mut Ftab,
    restore_bytes: &[u8],
) -> Result<(), RestoreError> {
    let restore = Ftab::parse(restore_bytes)?;
    match restore.get_entry(TAG_RRKO) {
        Some(entry) => primary.add_entry(TAG_RRKO, entry.to_vec())?,
        None => warn!("Restore firmware table has no rrko entry"),
    }

    Ok(())
}
