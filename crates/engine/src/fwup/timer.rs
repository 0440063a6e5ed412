//! Type-C retimer RTKit firmware.
//!
//! Retimers come in groups; every TSS key is suffixed with the group tag
//! mined from the device's info array, so one build can carry firmware
//! for several of them.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::ftab::Ftab;
use restore_protocol::value::DictExt;

use super::{add_ap_security, base_params, check_ticket, expect_rkos, family_response, graft_restore_entry};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

const HARDWARE_FIELDS: &[&str] = &[
    "ChipID",
    "BoardID",
    "ECID",
    "Nonce",
    "SecurityMode",
    "SecurityDomain",
    "ProductionMode",
];

fn malformed(reason: &'static str) -> RestoreError {
    RestoreError::MalformedMessage {
        msg_type: "FirmwareUpdaterData",
        reason,
    }
}

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let first = info
        .array_item("InfoArray")
        .and_then(|a| a.first())
        .and_then(Value::as_dictionary)
        .ok_or_else(|| malformed("missing InfoArray"))?;
    let tag = first
        .uint_item("Tag")
        .ok_or_else(|| malformed("retimer entry has no Tag"))?;
    let hardware = first
        .dict_item("HardwareID")
        .ok_or_else(|| malformed("retimer entry has no HardwareID"))?;

    let mut params = base_params(ctx, info);
    params.remove("InfoArray");
    add_ap_security(&mut params, ctx.device.image4_supported);
    for field in HARDWARE_FIELDS {
        if let Some(value) = hardware.get(*field) {
            params.insert(format!("Timer,{field},{tag}"), value.clone());
        }
    }

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_timer_tags(&mut request, &params);

    info!("Sending Timer TSS request for tag {tag}");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, &format!("Timer,Ticket,{tag}"));

    let payload = component::load(ctx, &format!("Timer,RTKitOS,{tag}"))?;
    let mut ftab = Ftab::parse(&payload)?;
    expect_rkos(&ftab);

    let restore_component = format!("Timer,RestoreRTKitOS,{tag}");
    if ctx.build_identity.has_component(&restore_component) {
        let restore = component::load(ctx, &restore_component)?;
        graft_restore_entry(&mut ftab, &restore)?;
    }

    Ok(family_response(&response, "Timer,", Value::Data(ftab.write())))
}
