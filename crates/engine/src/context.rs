use std::path::PathBuf;
use std::sync::Arc;

use plist::Dictionary;
use restore_protocol::message::ProgressBucket;
use restore_protocol::value::DictExt;
use tokio::sync::Notify;

use crate::ipsw::Ipsw;
use crate::personalize::Personalize;

/// Identity of the device being restored.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    pub udid: String,
    pub ecid: u64,
    pub serial: String,
    pub hardware_model: String,
    /// Whether the device expects IMG4 containers and `ApImg4Ticket`.
    pub image4_supported: bool,
}

/// Behavior switches for one session.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct RestoreFlags {
    pub erase: bool,
    pub custom: bool,
    pub exclude: bool,
    pub ignore_errors: bool,
    pub debug: bool,
}

pub type ProgressFn = Box<dyn Fn(ProgressBucket, f64) + Send + Sync>;

/// One build identity out of the build manifest: the description of a
/// specific restore variant for one hardware model.
#[derive(Debug, Clone)]
pub struct BuildIdentity(Dictionary);

impl BuildIdentity {
    pub fn new(dict: Dictionary) -> Self {
        Self(dict)
    }

    pub fn as_dict(&self) -> &Dictionary {
        &self.0
    }

    fn info(&self) -> Option<&Dictionary> {
        self.0.dict_item("Info")
    }

    pub fn device_class(&self) -> Option<&str> {
        self.info()?.str_item("DeviceClass")
    }

    pub fn macos_variant(&self) -> Option<&str> {
        self.info()?.str_item("MacOSVariant")
    }

    pub fn minimum_system_partition(&self) -> Option<u64> {
        self.info()?.uint_item("MinimumSystemPartition")
    }

    pub fn system_partition_padding(&self) -> Option<u64> {
        self.info()?.uint_item("SystemPartitionPadding")
    }

    pub fn fdr_support(&self) -> bool {
        self.info().map(|i| i.flag("FDRSupport")).unwrap_or(false)
    }

    pub fn manifest(&self) -> Option<&Dictionary> {
        self.0.dict_item("Manifest")
    }

    pub fn manifest_entry(&self, component: &str) -> Option<&Dictionary> {
        self.manifest()?.dict_item(component)
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.manifest_entry(component).is_some()
    }

    /// Archive path of a component, from `Manifest.<name>.Info.Path`.
    pub fn component_path(&self, component: &str) -> Option<&str> {
        self.manifest_entry(component)?
            .dict_item("Info")?
            .str_item("Path")
    }

    pub fn component_digest(&self, component: &str) -> Option<&[u8]> {
        self.manifest_entry(component)?.data_item("Digest")
    }

    /// Numeric identity fields are integers in newer manifests and hex
    /// strings ("0x38") in older ones.
    pub fn uint_field(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(v) => match v.as_unsigned_integer() {
                Some(n) => Some(n),
                None => {
                    let s = v.as_string()?;
                    let s = s.trim();
                    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                        u64::from_str_radix(hex, 16).ok()
                    } else {
                        s.parse().ok()
                    }
                }
            },
            None => None,
        }
    }
}

/// Shared state of one restore session, threaded through every handler.
///
/// All mutation happens under the cooperative main loop: ticket caches
/// are written at most once and read-only afterwards.
pub struct SessionContext {
    pub device: DeviceInfo,
    pub build_manifest: Dictionary,
    pub build_identity: BuildIdentity,
    pub ipsw: Box<dyn Ipsw + Send + Sync>,
    pub personalizer: Box<dyn Personalize + Send + Sync>,
    pub tss_url: String,
    pub flags: RestoreFlags,

    /// Main Ap ticket, obtained before the session.
    pub tss: Option<Dictionary>,
    /// Recovery-OS root ticket, obtained before the session.
    pub tss_recoveryos_root_ticket: Option<Dictionary>,
    /// Local-policy ticket, obtained on request during the session.
    pub tss_localpolicy: Option<Dictionary>,
    /// Baseband ticket cache, filled by the first baseband round-trip.
    pub bbtss: Option<Dictionary>,
    /// Explicit root-ticket bytes overriding the Ap ticket.
    pub root_ticket: Option<Vec<u8>>,
    /// Recovery-OS variant name announced in the start options.
    pub recovery_os_variant: Option<String>,

    /// Filesystem payload extracted out of the IPSW, cached across ASR
    /// requests.
    pub filesystem_path: Option<PathBuf>,
    /// Scratch directory for extracted payloads, removed with the session.
    pub scratch: Option<tempfile::TempDir>,

    pub protocol_version: u64,
    pub quit: bool,
    pub progress: Option<ProgressFn>,
    /// Signalled by the external mode-change notifier; the reboot path
    /// waits on it.
    pub device_event: Arc<Notify>,
    pub last_operation: Option<u64>,
}

impl SessionContext {
    pub fn new(
        device: DeviceInfo,
        build_manifest: Dictionary,
        build_identity: BuildIdentity,
        ipsw: Box<dyn Ipsw + Send + Sync>,
        personalizer: Box<dyn Personalize + Send + Sync>,
    ) -> Self {
        Self {
            device,
            build_manifest,
            build_identity,
            ipsw,
            personalizer,
            tss_url: String::new(),
            flags: RestoreFlags::default(),
            tss: None,
            tss_recoveryos_root_ticket: None,
            tss_localpolicy: None,
            bbtss: None,
            root_ticket: None,
            recovery_os_variant: None,
            filesystem_path: None,
            scratch: None,
            protocol_version: 0,
            quit: false,
            progress: None,
            device_event: Arc::new(Notify::new()),
            last_operation: None,
        }
    }

    pub fn notify_progress(&self, bucket: ProgressBucket, percent: f64) {
        if let Some(progress) = &self.progress {
            progress(bucket, percent);
        }
    }

    /// Scratch directory for extracted payloads, created on first use and
    /// removed when the context is dropped.
    pub fn scratch_dir(&mut self) -> std::io::Result<PathBuf> {
        if self.scratch.is_none() {
            self.scratch = Some(tempfile::tempdir()?);
        }
        Ok(self
            .scratch
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .unwrap_or_default())
    }
}

/// Restricts a device identifier to filename-safe characters before it is
/// composed into an on-disk path.
pub fn sanitize_udid(udid: &str) -> String {
    udid.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
