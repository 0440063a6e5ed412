//! Root tickets and the recovery-OS local policy.

use log::info;
use plist::Dictionary;
use restore_protocol::message::Message;
use restore_protocol::value::{DictExt, data};

use crate::asr::Asr;
use crate::context::SessionContext;
use crate::error::RestoreError;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::{self, TicketServer};

/// Minimal `lpol` IM4P the local policy is built from: the device signs
/// this template against the freshly issued policy ticket.
const LPOL_TEMPLATE: [u8; 22] = [
    0x30, 0x14, 0x16, 0x04, b'I', b'M', b'4', b'P', 0x16, 0x04, b'l', b'p', b'o', b'l',
    0x16, 0x03, b'1', b'.', b'0', 0x04, 0x01, 0x00,
];

fn ticket_bytes(
    ticket: &Dictionary,
    image4_supported: bool,
) -> Result<Vec<u8>, RestoreError> {
    let key = if image4_supported {
        "ApImg4Ticket"
    } else {
        "APTicket"
    };
    ticket
        .data_item(key)
        .map(|t| t.to_vec())
        .ok_or(RestoreError::MissingTicket("Ap"))
}

fn root_ticket_bytes(ctx: &SessionContext) -> Result<Vec<u8>, RestoreError> {
    if let Some(explicit) = &ctx.root_ticket {
        return Ok(explicit.clone());
    }
    let tss = ctx.tss.as_ref().ok_or(RestoreError::MissingTicket("Ap"))?;
    ticket_bytes(tss, ctx.device.image4_supported)
}

pub(crate) async fn send_root_ticket<T, X, A>(
    session: &mut Session<T, X, A>,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let bytes = root_ticket_bytes(&session.ctx)?;

    let mut reply = Dictionary::new();
    reply.insert("RootTicketData".into(), data(bytes));
    session.send_reply(reply).await
}

pub(crate) async fn send_recovery_os_root_ticket<T, X, A>(
    session: &mut Session<T, X, A>,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let ticket = session
        .ctx
        .tss_recoveryos_root_ticket
        .as_ref()
        .ok_or(RestoreError::MissingTicket("recovery OS"))?;
    let bytes = ticket_bytes(ticket, session.ctx.device.image4_supported)?;

    let mut reply = Dictionary::new();
    reply.insert("RecoveryOSRootTicketData".into(), data(bytes));
    session.send_reply(reply).await
}

/// Obtains a fresh local-policy ticket for the argument set the device
/// presented, then personalizes the embedded policy template with it.
pub(crate) async fn send_local_policy<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let mut params =
        tss::parameters_from_identity(&session.ctx.build_identity, &session.ctx.device);
    if let Some(args) = msg.body.dict_item("Arguments") {
        for (key, value) in args.iter() {
            let key: &str = key.as_ref();
            if key.starts_with("Ap,") {
                params.insert(key.into(), value.clone());
            }
        }
    }

    let mut request = tss::request_new();
    tss::add_common_tags(&mut request, &params);
    tss::add_local_policy_tags(&mut request, &params);

    info!("Requesting local policy ticket");
    let response = session
        .tss_server
        .send_request(&request, &session.ctx.tss_url)
        .await?;

    let personalized = session.ctx.personalizer.personalize_component(
        "Ap,LocalPolicy",
        &LPOL_TEMPLATE,
        &response,
    )?;
    session.ctx.tss_localpolicy = Some(response);

    let mut reply = Dictionary::new();
    reply.insert("Ap,LocalPolicy".into(), data(personalized));
    session.send_reply(reply).await
}
