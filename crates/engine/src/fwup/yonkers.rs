//! Yonkers firmware patches.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::value::data;

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
    let component = tss::add_yonkers_tags(&mut request, &params);

    info!("Sending Yonkers TSS request for {component}");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "Yonkers,Ticket");

    let payload = component::load(ctx, &component)?;

    let mut firmware = Dictionary::new();
    firmware.insert("YonkersFirmware".into(), data(payload));

    Ok(family_response(
        &response,
        "Yonkers,",
        Value::Dictionary(firmware),
    ))
}
