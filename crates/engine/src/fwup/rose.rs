//! Rose (always-on coprocessor) RTKit firmware.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::ftab::Ftab;

use super::{add_ap_security, base_params, check_ticket, expect_rkos, family_response, graft_restore_entry};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

const COMPONENT: &str = "Rap,RTKitOS";
const RESTORE_COMPONENT: &str = "Rap,RestoreRTKitOS";

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let mut params = base_params(ctx, info);
    add_ap_security(&mut params, ctx.device.image4_supported);

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_rose_tags(&mut request, &params);

    info!("Sending Rose TSS request");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "Rap,Ticket");

    let payload = component::load(ctx, COMPONENT)?;
    let mut ftab = Ftab::parse(&payload)?;
    expect_rkos(&ftab);

    if ctx.build_identity.has_component(RESTORE_COMPONENT) {
        let restore = component::load(ctx, RESTORE_COMPONENT)?;
        graft_restore_entry(&mut ftab, &restore)?;
    }

    Ok(family_response(&response, "Rap,", Value::Data(ftab.write())))
}
