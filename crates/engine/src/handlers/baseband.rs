//! Baseband data pipeline.
//!
//! The first nonce-carrying request triggers the baseband TSS round-trip;
//! the response is cached for the rest of the session. Each request then
//! extracts the baseband archive, signs it in place, and sends the whole
//! signed zip back.

use log::{info, warn};
use plist::Dictionary;
use restore_protocol::message::Message;
use restore_protocol::value::{DictExt, boolean, data};

use crate::asr::Asr;
use crate::baseband::sign_archive;
use crate::context::sanitize_udid;
use crate::error::RestoreError;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::{self, TicketServer};

/// Baseband request argument keys and their TSS parameter names.
const ARG_PARAMS: &[(&str, &str)] = &[
    ("ChipID", "BbChipID"),
    ("CertID", "BbGoldCertId"),
    ("ChipSerialNo", "BbSNUM"),
    ("Nonce", "BbNonce"),
];

pub(crate) async fn send_baseband_data<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let args = msg.body.dict_item("Arguments").unwrap_or(&msg.body);
    let nonce = args.data_item("Nonce").map(|n| n.to_vec());

    if session.ctx.bbtss.is_none() {
        if nonce.is_none() {
            return Err(RestoreError::MalformedMessage {
                msg_type: "DataRequestMsg",
                reason: "baseband request carries neither nonce nor cached ticket",
            });
        }

        let mut params =
            tss::parameters_from_identity(&session.ctx.build_identity, &session.ctx.device);
        for (arg, param) in ARG_PARAMS {
            if let Some(value) = args.get(*arg) {
                params.insert((*param).into(), value.clone());
            }
        }
        if session.ctx.build_identity.fdr_support() {
            params.insert("ApProductionMode".into(), boolean(true));
            params.insert("ApSecurityMode".into(), boolean(true));
        }

        let mut request = tss::request_new();
        tss::add_common_tags(&mut request, &params);
        tss::add_baseband_tags(&mut request, &params);

        info!("Sending baseband TSS request");
        let response = session
            .tss_server
            .send_request(&request, &session.ctx.tss_url)
            .await?;
        session.ctx.bbtss = Some(response);
    } else {
        info!("Reusing cached baseband ticket");
    }
    let bbtss = session
        .ctx
        .bbtss
        .clone()
        .ok_or(RestoreError::MissingTicket("baseband"))?;

    let archive_path = session
        .ctx
        .build_identity
        .component_path("BasebandFirmware")
        .ok_or_else(|| RestoreError::MissingComponent("BasebandFirmware".into()))?
        .to_string();
    let tempfile = session
        .ctx
        .scratch_dir()?
        .join(format!("bbfw_{}.zip", sanitize_udid(&session.ctx.device.udid)));

    session.ctx.ipsw.extract_to_file(&archive_path, &tempfile)?;

    let signed = sign_archive(&tempfile, &bbtss, nonce.as_deref());
    let contents = match &signed {
        Ok(()) => tokio::fs::read(&tempfile).await,
        Err(_) => Ok(Vec::new()),
    };
    if let Err(err) = tokio::fs::remove_file(&tempfile).await {
        warn!("Could not remove {}: {err}", tempfile.display());
    }
    signed?;

    let mut reply = Dictionary::new();
    reply.insert("BasebandData".into(), data(contents?));
    session.send_reply(reply).await
}
