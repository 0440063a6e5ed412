//! Savage firmware patches.

use log::info;
use plist::{Dictionary, Value};

use super::{base_params, check_ticket, family_response};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let params = base_params(ctx, info);

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    let component = tss::add_savage_tags(&mut request, &params)?;

    info!("Sending Savage TSS request for {component}");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "Savage,Ticket");

    let payload = component::load(ctx, &component)?;

    // The loader expects a 16-byte preamble with the payload length at
    // offset 4, little-endian, and the rest zeroed.
    let mut framed = vec![0u8; 16];
    framed[4..8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);

    Ok(family_response(&response, "Savage,", Value::Data(framed)))
}
