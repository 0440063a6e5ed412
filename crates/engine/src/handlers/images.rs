//! Single-shot component replies and the shared image-family handler.

use log::info;
use plist::{Dictionary, Value};
use restore_protocol::message::Message;
use restore_protocol::value::{DictExt, data, string};

use crate::asr::Asr;
use crate::component;
use crate::error::RestoreError;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::TicketServer;

/// Keys steering one family of image requests (FUD, personalized, EAN).
pub(crate) struct ImageFamily {
    pub list_key: &'static str,
    pub type_key: &'static str,
    pub data_key: &'static str,
}

pub(crate) const FUD: ImageFamily = ImageFamily {
    list_key: "FUDImageList",
    type_key: "IsFUDFirmware",
    data_key: "FUDImageData",
};

pub(crate) const PERSONALIZED: ImageFamily = ImageFamily {
    list_key: "ImageList",
    type_key: "IsFirmwarePayload",
    data_key: "ImageData",
};

pub(crate) const EAN: ImageFamily = ImageFamily {
    list_key: "EANImageList",
    type_key: "IsEarlyAccessFirmware",
    data_key: "EANData",
};

/// `{<reply_key>: personalize(component)}`.
pub(crate) async fn send_component<T, X, A>(
    session: &mut Session<T, X, A>,
    component: &str,
    reply_key: &str,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    info!("Sending {component}");
    let payload = component::load_with_session_ticket(&session.ctx, component)?;

    let mut reply = Dictionary::new();
    reply.insert(reply_key.into(), data(payload));
    session.send_reply(reply).await
}

pub(crate) async fn send_build_identity<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let variant = msg
        .body
        .dict_item("Arguments")
        .and_then(|args| args.str_item("Variant"))
        .unwrap_or("Erase");

    let mut reply = Dictionary::new();
    reply.insert(
        "BuildIdentityDict".into(),
        Value::Dictionary(session.ctx.build_identity.as_dict().clone()),
    );
    reply.insert("Variant".into(), string(variant));
    session.send_reply(reply).await
}

/// The shared image-family algorithm: list mode replies with the matching
/// component names; otherwise the selected payloads are personalized and
/// keyed by component name (or sent flat for a single named image).
pub(crate) async fn send_image_family<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
    family: ImageFamily,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let empty = Dictionary::new();
    let args = msg.body.dict_item("Arguments").unwrap_or(&empty);
    let want_list = args.flag(family.list_key);
    let type_key = args.str_item("ImageType").unwrap_or(family.type_key);
    let image_name = args.str_item("ImageName");

    let selected: Vec<String> = session
        .ctx
        .build_identity
        .manifest()
        .map(|manifest| {
            manifest
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .as_dictionary()
                        .and_then(|e| e.dict_item("Info"))
                        .map(|info| info.flag(type_key))
                        .unwrap_or(false)
                })
                .map(|(name, _)| {
                    let name: &str = name.as_ref();
                    name.to_string()
                })
                .collect()
        })
        .unwrap_or_default();

    let mut reply = Dictionary::new();
    if want_list {
        let names = selected.into_iter().map(Value::String).collect();
        reply.insert(family.list_key.into(), Value::Array(names));
    } else if let Some(name) = image_name {
        let payload = component::load_with_session_ticket(&session.ctx, name)?;
        reply.insert(family.data_key.into(), data(payload));
        reply.insert("ImageName".into(), string(name));
    } else {
        let mut images = Dictionary::new();
        for name in selected {
            let payload = component::load_with_session_ticket(&session.ctx, &name)?;
            images.insert(name, data(payload));
        }
        reply.insert(family.data_key.into(), Value::Dictionary(images));
    }

    session.send_reply(reply).await
}
