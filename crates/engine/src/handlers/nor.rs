//! NOR flash image pipeline.

use log::{debug, info};
use plist::{Dictionary, Value};
use restore_protocol::message::Message;
use restore_protocol::value::{DictExt, data};

use crate::asr::Asr;
use crate::component;
use crate::error::RestoreError;
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::TicketServer;

/// Firmware filename prefixes and the component names they stand for.
const FILENAME_COMPONENTS: &[(&str, &str)] = &[
    ("LLB", "LLB"),
    ("iBoot", "iBoot"),
    ("DeviceTree", "DeviceTree"),
    ("applelogo", "AppleLogo"),
    ("recoverymode", "RecoveryMode"),
    ("batterylow0", "BatteryLow0"),
    ("batterylow1", "BatteryLow1"),
    ("batterycharging0", "BatteryCharging0"),
    ("batterycharging1", "BatteryCharging1"),
    ("batteryfull", "BatteryFull"),
    ("glyphcharging", "BatteryCharging"),
    ("glyphplugin", "BatteryPlugin"),
    ("needservice", "NeedService"),
    ("SCAB", "SCAB"),
    ("sep-firmware", "RestoreSEP"),
];

fn component_for_filename(filename: &str) -> String {
    for (prefix, component) in FILENAME_COMPONENTS {
        if filename.starts_with(prefix) {
            return (*component).to_string();
        }
    }
    // Fall back to the stem before the first dot
    filename
        .split('.')
        .next()
        .unwrap_or(filename)
        .to_string()
}

pub(crate) async fn send_nor_data<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let ctx = &session.ctx;
    let ticket = ctx
        .tss
        .as_ref()
        .ok_or(RestoreError::MissingTicket("Ap"))?
        .clone();

    let llb_path = component::archive_path("LLB", ctx.tss.as_ref(), &ctx.build_identity)?;
    let firmware_dir = llb_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    // Prefer the firmware directory's own manifest over walking the
    // build identity.
    let mut firmware_files: Vec<(String, String)> = Vec::new();
    let manifest_path = format!("{firmware_dir}/manifest");
    if ctx.ipsw.file_exists(&manifest_path) {
        let listing = ctx.ipsw.extract_to_memory(&manifest_path)?;
        for line in String::from_utf8_lossy(&listing).lines() {
            let filename = line.trim();
            if filename.is_empty() {
                continue;
            }
            firmware_files.push((
                component_for_filename(filename),
                format!("{firmware_dir}/{filename}"),
            ));
        }
    } else if let Some(manifest) = ctx.build_identity.manifest() {
        for (name, entry) in manifest.iter() {
            let name: &str = name.as_ref();
            let Some(info) = entry.as_dictionary().and_then(|e| e.dict_item("Info")) else {
                continue;
            };
            let firmware = info.flag("IsFirmwarePayload")
                || (info.flag("IsSecondaryFirmwarePayload") && info.flag("IsLoadedByiBoot"));
            if !firmware {
                continue;
            }
            if let Some(path) = info.str_item("Path") {
                firmware_files.push((name.to_string(), path.to_string()));
            }
        }
    }
    debug!("NOR firmware set: {} images", firmware_files.len());

    let llb_raw = ctx.ipsw.extract_to_memory(&llb_path)?;
    let llb = ctx
        .personalizer
        .personalize_component("LLB", &llb_raw, &ticket)?;

    let mut reply = Dictionary::new();
    reply.insert("LlbImageData".into(), data(llb));

    let flash_version_1 = msg
        .body
        .dict_item("Arguments")
        .map(|args| args.flag("FlashVersion1"))
        .unwrap_or(false)
        || msg.body.flag("FlashVersion1");

    // LLB went out above; RestoreSEP and SEP go out under their own keys.
    let mut nor_dict = Dictionary::new();
    let mut nor_array: Vec<Value> = Vec::new();
    for (name, path) in &firmware_files {
        if name == "LLB" || name == "RestoreSEP" {
            continue;
        }
        let raw = ctx.ipsw.extract_to_memory(path)?;
        let image = ctx.personalizer.personalize_component(name, &raw, &ticket)?;
        if flash_version_1 {
            nor_dict.insert(name.clone(), data(image));
        } else if name.starts_with("iBoot") {
            // iBoot leads the flash order
            nor_array.insert(0, Value::Data(image));
        } else {
            nor_array.push(Value::Data(image));
        }
    }
    if flash_version_1 {
        reply.insert("NorImageData".into(), Value::Dictionary(nor_dict));
    } else {
        reply.insert("NorImageData".into(), Value::Array(nor_array));
    }

    for (name, key) in [("RestoreSEP", "RestoreSEPImageData"), ("SEP", "SEPImageData")] {
        if !ctx.build_identity.has_component(name) {
            continue;
        }
        let image = component::load_personalized(ctx, name, &ticket)?;
        reply.insert(key.into(), data(image));
    }

    info!("Sending NOR data");
    session.send_reply(reply).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_mapping() {
        assert_eq!(component_for_filename("LLB.n61.RELEASE.im4p"), "LLB");
        assert_eq!(component_for_filename("iBoot.n61.RELEASE.im4p"), "iBoot");
        assert_eq!(component_for_filename("applelogo@2x.s5l8960x.img4"), "AppleLogo");
        assert_eq!(
            component_for_filename("sep-firmware.n61.RELEASE.im4p"),
            "RestoreSEP"
        );
        // Unknown names fall back to the stem
        assert_eq!(component_for_filename("somefirmware.im4p"), "somefirmware");
    }
}
