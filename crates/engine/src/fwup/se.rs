//! Secure Element firmware.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::value::DictExt;

use super::{base_params, check_ticket, family_response};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

/// Chip revisions that take the split update payload instead of the
/// monolithic firmware image.
const UPDATE_PAYLOAD_CHIP_IDS: &[u64] = &[0x73, 0x64, 0xC8, 0xD2];

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let params = base_params(ctx, info);

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_se_tags(&mut request, &params);

    info!("Sending SE TSS request");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "SE,Ticket");

    let chip_id = info
        .uint_item("SE,ChipID")
        .or_else(|| ctx.build_identity.uint_field("SE,ChipID"))
        .unwrap_or(0);
    let component = match chip_id {
        0x20211 => "SE,Firmware",
        id if UPDATE_PAYLOAD_CHIP_IDS.contains(&id) => "SE,UpdatePayload",
        _ if ctx.build_identity.has_component("SE,UpdatePayload") => "SE,UpdatePayload",
        _ => "SE,Firmware",
    };

    let payload = component::load(ctx, component)?;

    Ok(family_response(&response, "SE,", Value::Data(payload)))
}
