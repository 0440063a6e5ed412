//! Baobab display timing controller firmware.

use log::info;
use plist::{Dictionary, Value};

use super::{base_params, check_ticket, family_response};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

const COMPONENT: &str = "Baobab,TCON";

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let params = base_params(ctx, info);

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_tcon_tags(&mut request, &params);

    info!("Sending TCON TSS request");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "Baobab,Ticket");

    let payload = component::load(ctx, COMPONENT)?;

    Ok(family_response(&response, "Baobab,", Value::Data(payload)))
}
