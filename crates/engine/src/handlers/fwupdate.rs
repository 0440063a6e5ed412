//! Firmware-updater request routing.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::message::Message;
use restore_protocol::value::DictExt;

use crate::asr::Asr;
use crate::error::RestoreError;
use crate::fwup;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::TicketServer;

pub(crate) async fn send_firmware_updater_data<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let malformed = |reason| RestoreError::MalformedMessage {
        msg_type: "FirmwareUpdaterData",
        reason,
    };
    let args = msg
        .body
        .dict_item("Arguments")
        .ok_or_else(|| malformed("missing Arguments"))?;
    let updater = args
        .str_item("MessageArgUpdaterName")
        .ok_or_else(|| malformed("missing MessageArgUpdaterName"))?;
    let info = args
        .dict_item("MessageArgInfo")
        .ok_or_else(|| malformed("missing MessageArgInfo"))?;

    info!("Firmware updater data requested for {updater}");

    let ctx = &session.ctx;
    let server = &session.tss_server;
    let firmware = match updater {
        "SE" => fwup::se::firmware_data(ctx, server, info).await?,
        "Savage" => match info.dict_item("YonkersDeviceInfo") {
            Some(yonkers) => fwup::yonkers::firmware_data(ctx, server, yonkers).await?,
            None => fwup::savage::firmware_data(ctx, server, info).await?,
        },
        "Rose" => fwup::rose::firmware_data(ctx, server, info).await?,
        "T200" => fwup::veridian::firmware_data(ctx, server, info).await?,
        "AppleTCON" => fwup::tcon::firmware_data(ctx, server, info).await?,
        "AppleTypeCRetimer" => fwup::timer::firmware_data(ctx, server, info).await?,
        _ => return Err(malformed("unknown updater")),
    };

    let mut reply = Dictionary::new();
    reply.insert("FirmwareResponseData".into(), Value::Dictionary(firmware));
    session.send_reply(reply).await
}
