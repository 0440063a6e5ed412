//! Veridian battery management unit firmware map.

use std::io::Cursor;

use log::info;
use plist::{Dictionary, Value};

use super::{base_params, check_ticket, family_response};
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::tss::{self, TicketServer};

const COMPONENT: &str = "BMU,FirmwareMap";

pub async fn firmware_data<S: TicketServer>(
    ctx: &SessionContext,
    server: &S,
    info: &Dictionary,
) -> Result<Dictionary, RestoreError> {
    let params = base_params(ctx, info);

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_veridian_tags(&mut request, &params);

    info!("Sending Veridian TSS request");
    let response = server.send_request(&request, &ctx.tss_url).await?;
    check_ticket(&response, "BMU,Ticket");

    let payload = component::load(ctx, COMPONENT)?;

    // The firmware map is itself a property list (binary or XML); the
    // device wants it back in binary form with the manifest digest added.
    let map = Value::from_reader(Cursor::new(&payload))?;
    let mut map = match map {
        Value::Dictionary(dict) => dict,
        _ => {
            return Err(RestoreError::MalformedMessage {
                msg_type: "FirmwareUpdaterData",
                reason: "BMU firmware map is not a dictionary",
            });
        }
    };
    if let Some(digest) = ctx.build_identity.component_digest(COMPONENT) {
        map.insert("fw_map_digest".into(), Value::Data(digest.to_vec()));
    }

    let mut framed = Vec::new();
    plist::to_writer_binary(&mut framed, &Value::Dictionary(map))?;

    Ok(family_response(&response, "BMU,", Value::Data(framed)))
}
