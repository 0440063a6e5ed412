//! Boot object streaming (V3 personalized, V4 source).
//!
//! The payload goes out in fixed-size `FileData` chunks followed by a
//! single `FileDataDone`. Nothing else may interleave, which the
//! cooperative loop guarantees for free.

use log::info;
use plist::Dictionary;
use restore_protocol::message::Message;
use restore_protocol::value::{DictExt, boolean, data};

use crate::asr::Asr;
use crate::component;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::TicketServer;

const FILE_DATA_CHUNK: usize = 8192;

/// Components that resolve to archive metadata instead of a manifest
/// entry. They are sent as-is, never personalized.
const RESTORE_VERSION: &str = "__RestoreVersion__";
const SYSTEM_VERSION: &str = "__SystemVersion__";
const GLOBAL_MANIFEST: &str = "__GlobalManifest__";

pub(crate) async fn send_personalized_v3<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let payload = resolve_payload(&session.ctx, msg, true)?;
    stream_chunks(session, payload).await
}

pub(crate) async fn send_source_v4<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let payload = resolve_payload(&session.ctx, msg, false)?;
    stream_chunks(session, payload).await
}

fn resolve_payload(
    ctx: &SessionContext,
    msg: &Message,
    personalized: bool,
) -> Result<Vec<u8>, RestoreError> {
    let image_name = msg
        .body
        .dict_item("Arguments")
        .and_then(|args| args.str_item("ImageName"))
        .ok_or(RestoreError::MalformedMessage {
            msg_type: "DataRequestMsg",
            reason: "boot object request has no ImageName",
        })?;

    info!("Sending boot object {image_name}");

    match image_name {
        RESTORE_VERSION => Ok(ctx.ipsw.extract_to_memory("RestoreVersion.plist")?),
        SYSTEM_VERSION => Ok(ctx.ipsw.extract_to_memory("SystemVersion.plist")?),
        GLOBAL_MANIFEST => {
            let ticket = ctx.tss.as_ref().ok_or(RestoreError::MissingTicket("Ap"))?;
            ticket
                .data_item("ApImg4Ticket")
                .map(|t| t.to_vec())
                .ok_or(RestoreError::MissingTicket("ApImg4Ticket"))
        }
        name if personalized => component::load_with_session_ticket(ctx, name),
        name => component::load(ctx, name),
    }
}

async fn stream_chunks<T, X, A>(
    session: &mut Session<T, X, A>,
    payload: Vec<u8>,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    for chunk in payload.chunks(FILE_DATA_CHUNK) {
        let mut part = Dictionary::new();
        part.insert("FileData".into(), data(chunk.to_vec()));
        session.send_reply(part).await?;
    }

    let mut done = Dictionary::new();
    done.insert("FileDataDone".into(), boolean(true));
    session.send_reply(done).await
}
