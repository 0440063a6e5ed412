//! Ticket-signing service request builder.
//!
//! A TSS request is a property list assembled from the build identity's
//! manifest plus device-specific keys, then posted to the signing server.
//! The HTTP dispatch itself is a collaborator; everything here builds the
//! parameter dictionaries.

use plist::{Dictionary, Value};
use restore_protocol::value::{DictExt, boolean, string, uint};
use uuid::Uuid;

use crate::context::{BuildIdentity, DeviceInfo};

pub const TSS_CLIENT_VERSION: &str = "libauthinstall-850.0.2";

/// Default signing server, used when the caller configures no override.
pub const DEFAULT_TSS_URL: &str = "http://gs.apple.com/TSS/controller?action=2";

#[derive(Debug, thiserror::Error)]
pub enum TssError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server returned no usable response")]
    NoResponse,

    #[error("Response is missing {0}")]
    MissingEntry(String),
}

pub trait TicketServer {
    async fn send_request(
        &self,
        request: &Dictionary,
        url: &str,
    ) -> Result<Dictionary, TssError>;
}

/// Fresh request skeleton with the client identification tags.
pub fn request_new() -> Dictionary {
    let mut request = Dictionary::new();
    request.insert("@HostPlatformInfo".into(), string("mac"));
    request.insert("@VersionInfo".into(), string(TSS_CLIENT_VERSION));
    request.insert(
        "@UUID".into(),
        string(Uuid::new_v4().to_string().to_uppercase()),
    );
    request
}

/// Base parameter dictionary shared by every per-class request.
pub fn parameters_from_identity(
    identity: &BuildIdentity,
    device: &DeviceInfo,
) -> Dictionary {
    let mut params = Dictionary::new();
    params.insert("ApECID".into(), uint(device.ecid));

    for key in ["ApChipID", "ApBoardID", "ApSecurityDomain"] {
        if let Some(v) = identity.uint_field(key) {
            params.insert(key.into(), uint(v));
        }
    }
    if let Some(unique_build) = identity.as_dict().data_item("UniqueBuildID") {
        params.insert("UniqueBuildID".into(), Value::Data(unique_build.to_vec()));
    }
    if let Some(manifest) = identity.manifest() {
        params.insert("Manifest".into(), Value::Dictionary(manifest.clone()));
    }

    params
}

const COMMON_KEYS: &[&str] = &[
    "ApECID",
    "ApChipID",
    "ApBoardID",
    "ApSecurityDomain",
    "ApProductionMode",
    "ApSecurityMode",
    "ApSupportsImg4",
    "UniqueBuildID",
];

pub fn add_common_tags(request: &mut Dictionary, params: &Dictionary) {
    for key in COMMON_KEYS {
        if let Some(v) = params.get(*key) {
            request.insert((*key).into(), v.clone());
        }
    }
}

/// Copies the manifest entries whose names start with `prefix` into the
/// request, with the host-only `Info` subdictionary stripped.
fn add_manifest_entries(request: &mut Dictionary, params: &Dictionary, prefix: &str) {
    let Some(manifest) = params.dict_item("Manifest") else {
        return;
    };

    for (key, value) in manifest.iter() {
        let key: &str = key.as_ref();
        if !key.starts_with(prefix) {
            continue;
        }
        if let Some(entry) = value.as_dictionary() {
            let mut entry = entry.clone();
            entry.remove("Info");
            request.insert(key.into(), Value::Dictionary(entry));
        }
    }
}

fn copy_with_prefix(request: &mut Dictionary, params: &Dictionary, prefix: &str) {
    for (key, value) in params.iter() {
        let key: &str = key.as_ref();
        if key.starts_with(prefix) {
            request.insert(key.into(), value.clone());
        }
    }
}

/// Shared shape of the co-processor family tag adders: request the
/// family ticket, carry over the family parameters, attach the family's
/// manifest entries.
fn add_family_tags(request: &mut Dictionary, params: &Dictionary, family: &str) {
    request.insert(format!("@{family}Ticket"), boolean(true));
    copy_with_prefix(request, params, family);
    add_manifest_entries(request, params, family);
}

pub fn add_ap_tags(request: &mut Dictionary, params: &Dictionary, image4_supported: bool) {
    if image4_supported {
        request.insert("@ApImg4Ticket".into(), boolean(true));
    } else {
        request.insert("@APTicket".into(), boolean(true));
    }
    add_manifest_entries(request, params, "");
}

pub fn add_baseband_tags(request: &mut Dictionary, params: &Dictionary) {
    request.insert("@BBTicket".into(), boolean(true));
    copy_with_prefix(request, params, "Bb");
    add_manifest_entries(request, params, "BasebandFirmware");
}

pub fn add_local_policy_tags(request: &mut Dictionary, params: &Dictionary) {
    request.insert("@Ap,LocalPolicy".into(), boolean(true));
    copy_with_prefix(request, params, "Ap,");
}

pub fn add_se_tags(request: &mut Dictionary, params: &Dictionary) {
    add_family_tags(request, params, "SE,");
}

/// Savage patches are named for the silicon revision and fusing, so the
/// tag adder also resolves the component to fetch.
pub fn add_savage_tags(
    request: &mut Dictionary,
    params: &Dictionary,
) -> Result<String, TssError> {
    add_family_tags(request, params, "Savage,");

    let revision = params
        .data_item("Savage,Revision")
        .ok_or_else(|| TssError::MissingEntry("Savage,Revision".into()))?;
    let series = match revision.get(2).copied() {
        Some(0x01) | None => "B0",
        Some(0x02) => "B2",
        Some(_) => "BA",
    };
    let grade = if params.flag("Savage,ProductionMode") {
        "Prod"
    } else {
        "Dev"
    };

    Ok(format!("Savage,{series}-{grade}-Patch"))
}

pub fn add_yonkers_tags(request: &mut Dictionary, params: &Dictionary) -> String {
    add_family_tags(request, params, "Yonkers,");
    "Yonkers,SysTopPatch".into()
}

pub fn add_rose_tags(request: &mut Dictionary, params: &Dictionary) {
    add_family_tags(request, params, "Rap,");
}

pub fn add_veridian_tags(request: &mut Dictionary, params: &Dictionary) {
    add_family_tags(request, params, "BMU,");
}

pub fn add_tcon_tags(request: &mut Dictionary, params: &Dictionary) {
    add_family_tags(request, params, "Baobab,");
}

pub fn add_timer_tags(request: &mut Dictionary, params: &Dictionary) {
    add_family_tags(request, params, "Timer,");
}

#[cfg(test)]
mod tests {
    use super::*;
    use restore_protocol::value::data;

    fn params_with_manifest() -> Dictionary {
        let mut se_entry = Dictionary::new();
        let mut info = Dictionary::new();
        info.insert("Path".into(), string("Firmware/se.bin"));
        se_entry.insert("Info".into(), Value::Dictionary(info));
        se_entry.insert("Digest".into(), data(vec![0x01]));

        let mut manifest = Dictionary::new();
        manifest.insert("SE,Firmware".into(), Value::Dictionary(se_entry));
        manifest.insert("KernelCache".into(), Value::Dictionary(Dictionary::new()));

        let mut params = Dictionary::new();
        params.insert("ApECID".into(), uint(0xDEAD));
        params.insert("SE,ChipID".into(), uint(0x20211));
        params.insert("Manifest".into(), Value::Dictionary(manifest));
        params
    }

    #[test]
    fn request_skeleton_has_client_tags() {
        let request = request_new();
        assert_eq!(request.str_item("@HostPlatformInfo"), Some("mac"));
        assert_eq!(request.str_item("@VersionInfo"), Some(TSS_CLIENT_VERSION));
        assert!(request.str_item("@UUID").is_some());
    }

    #[test]
    fn family_tags_copy_params_and_strip_info() {
        let params = params_with_manifest();
        let mut request = request_new();
        add_common_tags(&mut request, &params);
        add_se_tags(&mut request, &params);

        assert_eq!(request.uint_item("ApECID"), Some(0xDEAD));
        assert_eq!(request.uint_item("SE,ChipID"), Some(0x20211));
        assert_eq!(request.bool_item("@SE,Ticket"), Some(true));

        let entry = request.dict_item("SE,Firmware").unwrap();
        assert!(entry.get("Info").is_none());
        assert_eq!(entry.data_item("Digest"), Some(&[0x01][..]));
        // Entries of other components stay out
        assert!(request.get("KernelCache").is_none());
    }

    #[test]
    fn savage_component_naming() {
        let mut params = params_with_manifest();
        params.insert("Savage,Revision".into(), data(vec![0x00, 0x00, 0x02]));
        params.insert("Savage,ProductionMode".into(), boolean(true));

        let mut request = request_new();
        let component = add_savage_tags(&mut request, &params).unwrap();
        assert_eq!(component, "Savage,B2-Prod-Patch");

        params.insert("Savage,Revision".into(), data(vec![0x00, 0x00, 0x01]));
        params.insert("Savage,ProductionMode".into(), boolean(false));
        let component = add_savage_tags(&mut request, &params).unwrap();
        assert_eq!(component, "Savage,B0-Dev-Patch");
    }

    #[test]
    fn baseband_tags() {
        let mut params = Dictionary::new();
        params.insert("BbChipID".into(), uint(0x1234));
        params.insert("BbGoldCertId".into(), uint(0x5678));
        params.insert("BbSNUM".into(), data(vec![0x11, 0x22]));

        let mut request = request_new();
        add_baseband_tags(&mut request, &params);

        assert_eq!(request.bool_item("@BBTicket"), Some(true));
        assert_eq!(request.uint_item("BbChipID"), Some(0x1234));
        assert_eq!(request.data_item("BbSNUM"), Some(&[0x11, 0x22][..]));
    }
}
