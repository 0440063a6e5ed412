//! Component loading.
//!
//! A component is a named firmware image inside the IPSW. The ticket may
//! carry a path override for it; otherwise the build identity's manifest
//! decides where it lives.

use plist::Dictionary;
use restore_protocol::value::DictExt;

use crate::context::{BuildIdentity, SessionContext};
use crate::error::RestoreError;

/// Resolves a component's archive path, preferring the ticket's entry.
pub fn archive_path(
    component: &str,
    ticket: Option<&Dictionary>,
    identity: &BuildIdentity,
) -> Result<String, RestoreError> {
    if let Some(path) = ticket
        .and_then(|t| t.dict_item(component))
        .and_then(|entry| entry.str_item("Path"))
    {
        return Ok(path.into());
    }

    identity
        .component_path(component)
        .map(String::from)
        .ok_or_else(|| RestoreError::MissingComponent(component.into()))
}

/// Extracts a component's raw payload from the IPSW.
pub fn load(ctx: &SessionContext, component: &str) -> Result<Vec<u8>, RestoreError> {
    let path = archive_path(component, ctx.tss.as_ref(), &ctx.build_identity)?;
    log::debug!("Extracting {component} ({path})");

    Ok(ctx.ipsw.extract_to_memory(&path)?)
}

/// Extracts and personalizes a component with an explicit ticket.
pub fn load_personalized(
    ctx: &SessionContext,
    component: &str,
    ticket: &Dictionary,
) -> Result<Vec<u8>, RestoreError> {
    let data = load(ctx, component)?;

    Ok(ctx
        .personalizer
        .personalize_component(component, &data, ticket)?)
}

/// Extracts and personalizes a component with the session's Ap ticket.
pub fn load_with_session_ticket(
    ctx: &SessionContext,
    component: &str,
) -> Result<Vec<u8>, RestoreError> {
    let ticket = ctx
        .tss
        .as_ref()
        .ok_or(RestoreError::MissingTicket("Ap"))?
        .clone();

    load_personalized(ctx, component, &ticket)
}
