//! Session orchestrator.
//!
//! Owns the conversation with the restore daemon: device acquisition,
//! the start-restore options, and the message pump that routes data
//! requests to the handlers until a terminal status arrives.

use std::time::Duration;

use log::{debug, error, info, warn};
use plist::{Dictionary, Value};
use restore_protocol::message::{
    Message, MsgType, ProgressBucket, StatusCode, adjust_operation, operation_name,
    progress_bucket,
};
use restore_protocol::value::{DictExt, boolean, string, uint};
use tokio::time::{sleep, timeout};
use tokio_retry::strategy::FixedInterval;
use uuid::Uuid;

use crate::asr::Asr;
use crate::context::{RestoreFlags, SessionContext, sanitize_udid};
use crate::error::RestoreError;
use crate::handlers;
use crate::transport::{RESTORE_SERVICE_TYPE, RestoreTransport, TransportError};
use crate::tss::{DEFAULT_TSS_URL, TicketServer};

/// Secondary data ports come up lazily on the device side.
const DATA_PORT_CONNECT_ATTEMPTS: usize = 10;
const DATA_PORT_CONNECT_INTERVAL_MS: u64 = 1000;

const DEVICE_ACQUIRE_ATTEMPTS: usize = 10;
const DEVICE_ACQUIRE_INTERVAL_MS: u64 = 1000;

/// How long the mode-change notifier gets to observe the reboot.
const REBOOT_TIMEOUT_SECS: u64 = 30;

const RECOVERY_OS_PARTITION_SIZE_MB: u64 = 5120;

/// Everything the device may ask for.
const SUPPORTED_DATA_TYPES: &[&str] = &[
    "BasebandData",
    "BasebandUpdaterOutputData",
    "BootabilityBundle",
    "BuildIdentityDict",
    "DeviceTree",
    "EANData",
    "FDRTrustData",
    "FUDData",
    "FirmwareUpdaterData",
    "KernelCache",
    "NORData",
    "PersonalizedBootObjectV3",
    "PersonalizedData",
    "RecoveryOSASRImage",
    "RecoveryOSLocalPolicy",
    "RecoveryOSRootTicketData",
    "RootTicket",
    "SourceBootObjectV4",
    "SystemImageCanonicalMetadata",
    "SystemImageData",
    "SystemImageRootHash",
];

const SUPPORTED_MESSAGE_TYPES: &[&str] = &[
    "BBUpdateStatusMsg",
    "BasebandUpdaterOutputData",
    "CheckpointMsg",
    "DataRequestMsg",
    "PreviousRestoreLogMsg",
    "ProgressMsg",
    "ReceivedFinalStatusMsg",
    "StatusMsg",
];

/// Session configuration supplied by the embedding front-end.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionOptions {
    pub flags: RestoreFlags,
    pub tss_url: String,
    /// Explicit root-ticket bytes overriding the Ap ticket.
    pub root_ticket: Option<Vec<u8>>,
    /// Recovery-OS variant announced on macOS targets.
    pub recovery_os_variant: Option<String>,
    pub acquire_attempts: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            flags: RestoreFlags::default(),
            tss_url: DEFAULT_TSS_URL.into(),
            root_ticket: None,
            recovery_os_variant: None,
            acquire_attempts: DEVICE_ACQUIRE_ATTEMPTS,
        }
    }
}

pub struct Session<T, X, A> {
    pub transport: T,
    pub tss_server: X,
    pub asr: A,
    pub ctx: SessionContext,
    acquire_attempts: usize,
}

impl<T, X, A> Session<T, X, A>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    pub fn new(
        transport: T,
        tss_server: X,
        asr: A,
        mut ctx: SessionContext,
        options: SessionOptions,
    ) -> Self {
        ctx.flags = options.flags;
        ctx.tss_url = options.tss_url;
        ctx.root_ticket = options.root_ticket;
        ctx.recovery_os_variant = options.recovery_os_variant;

        Self {
            transport,
            tss_server,
            asr,
            ctx,
            acquire_attempts: options.acquire_attempts,
        }
    }

    /// Runs the restore to completion: acquire, start, pump messages.
    pub async fn run(&mut self) -> Result<(), RestoreError> {
        self.open().await?;

        let options = self.start_options();
        info!("Starting restore");
        self.transport
            .start_restore(options, self.ctx.protocol_version)
            .await?;

        self.main_loop().await
    }

    async fn open(&mut self) -> Result<(), RestoreError> {
        let udid = self.ctx.device.udid.clone();
        let mut delays = FixedInterval::from_millis(DEVICE_ACQUIRE_INTERVAL_MS)
            .take(self.acquire_attempts.saturating_sub(1));
        loop {
            match self.transport.open(&udid).await {
                Ok(()) => break,
                Err(err) => match delays.next() {
                    Some(delay) => {
                        debug!("Waiting for restore mode device ({err})");
                        sleep(delay).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }

        let (service, version) = self.transport.query_type().await?;
        if service != RESTORE_SERVICE_TYPE {
            return Err(TransportError::WrongService(service).into());
        }
        self.ctx.protocol_version = version;
        info!("Connected to {RESTORE_SERVICE_TYPE}, protocol version {version}");

        if let Some(hardware) = self.transport.query_value("HardwareInfo").await? {
            debug!("HardwareInfo: {hardware:?}");
        }
        if let Some(saved) = self.transport.get_value("SavedDebugInfo").await? {
            debug!("SavedDebugInfo: {saved:?}");
        }

        if self.ctx.bbtss.is_none()
            && let Some(tss) = &self.ctx.tss
            && tss.get("BBTicket").is_some()
        {
            debug!("Main ticket carries a BBTicket, seeding the baseband cache");
            self.ctx.bbtss = Some(tss.clone());
        }

        Ok(())
    }

    fn start_options(&self) -> Dictionary {
        let identity = &self.ctx.build_identity;

        let mut options = Dictionary::new();
        options.insert("AutoBootDelay".into(), uint(0));
        options.insert(
            "SupportedDataTypes".into(),
            Value::Dictionary(type_set(SUPPORTED_DATA_TYPES)),
        );
        options.insert(
            "SupportedMessageTypes".into(),
            Value::Dictionary(type_set(SUPPORTED_MESSAGE_TYPES)),
        );
        if let Some(padding) = identity.system_partition_padding() {
            options.insert("SystemPartitionPadding".into(), uint(padding));
        }
        options.insert("CreateFilesystemPartitions".into(), boolean(true));
        options.insert("SystemImage".into(), boolean(true));
        options.insert(
            "UUID".into(),
            string(Uuid::new_v4().to_string().to_uppercase()),
        );

        if let Some(variant) = identity.macos_variant() {
            options.insert(
                "AuthInstallRestoreBehavior".into(),
                string(if self.ctx.flags.erase { "Erase" } else { "Update" }),
            );
            options.insert(
                "AuthInstallRecoveryOSVariant".into(),
                string(self.ctx.recovery_os_variant.as_deref().unwrap_or(variant)),
            );
            options.insert("FormatForAPFS".into(), boolean(true));
            options.insert("InstallRecoveryOS".into(), boolean(true));
            options.insert(
                "recoveryOSPartitionSize".into(),
                uint(RECOVERY_OS_PARTITION_SIZE_MB),
            );
        } else {
            options.insert("BootImageType".into(), string("UserOrInternal"));
            options.insert("DFUFileType".into(), string("RELEASE"));
            options.insert("NORImageType".into(), string("production"));
            options.insert("KernelCacheType".into(), string("Release"));
            options.insert("SystemImageType".into(), string("User"));
            options.insert("PersonalizedDuringPreflight".into(), boolean(true));
            options.insert("RestoreBundlePath".into(), string("/tmp/Per2.tmp"));
            if let Some(tz0) = identity
                .as_dict()
                .dict_item("Info")
                .and_then(|info| info.uint_item("TZ0RequiredCapacity"))
            {
                options.insert("TZ0RequiredCapacity".into(), uint(tz0));
            }
        }

        options
    }

    async fn main_loop(&mut self) -> Result<(), RestoreError> {
        let mut first_error: Option<RestoreError> = None;

        while !self.ctx.quit {
            let received = match self.transport.receive().await {
                Ok(value) => value,
                Err(err) if err.is_timeout() => continue,
                Err(err) => {
                    error!("Connection to the restore daemon broke ({err})");
                    first_error.get_or_insert(err.into());
                    break;
                }
            };
            let Some(message) = Message::from_value(received) else {
                debug!("Ignoring malformed message");
                continue;
            };

            if let Err(err) = self.handle_message(&message).await {
                error!("{err}");
                if self.ctx.flags.ignore_errors {
                    warn!("Continuing despite the error");
                } else {
                    self.ctx.quit = true;
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn handle_message(&mut self, message: &Message) -> Result<(), RestoreError> {
        match &message.msg_type {
            MsgType::DataRequestMsg => self.dispatch_data_request(message).await,
            MsgType::ProgressMsg => {
                self.handle_progress(message);
                Ok(())
            }
            MsgType::StatusMsg => self.handle_status(message).await,
            MsgType::CheckpointMsg => {
                handle_checkpoint(message);
                Ok(())
            }
            MsgType::PreviousRestoreLogMsg => {
                if let Some(text) = message.body.str_item("PreviousRestoreLog") {
                    info!("Previous restore log:\n{text}");
                }
                Ok(())
            }
            MsgType::BbUpdateStatusMsg => {
                debug!("Baseband update status: {:?}", message.body);
                Ok(())
            }
            MsgType::BasebandUpdaterOutputData => self.save_updater_output(message).await,
            MsgType::Unknown(name) => {
                info!("Unhandled message type {name}");
                Ok(())
            }
        }
    }

    async fn dispatch_data_request(&mut self, message: &Message) -> Result<(), RestoreError> {
        let Some(data_type) = message.body.str_item("DataType") else {
            debug!("Data request without a DataType");
            return Ok(());
        };
        let data_type = data_type.to_string();
        debug!("Device requested {data_type}");

        let result = match data_type.as_str() {
            "SystemImageData" | "RecoveryOSASRImage" => self.send_filesystem().await,
            "BuildIdentityDict" => handlers::images::send_build_identity(self, message).await,
            "PersonalizedBootObjectV3" => {
                handlers::boot_object::send_personalized_v3(self, message).await
            }
            "SourceBootObjectV4" => handlers::boot_object::send_source_v4(self, message).await,
            "RecoveryOSLocalPolicy" => handlers::tickets::send_local_policy(self, message).await,
            "RootTicket" => handlers::tickets::send_root_ticket(self).await,
            "RecoveryOSRootTicketData" => {
                handlers::tickets::send_recovery_os_root_ticket(self).await
            }
            "KernelCache" => {
                handlers::images::send_component(self, "KernelCache", "KernelCacheFile").await
            }
            "DeviceTree" => {
                handlers::images::send_component(self, "DeviceTree", "DeviceTreeFile").await
            }
            "SystemImageRootHash" => {
                handlers::images::send_component(self, "SystemVolume", "SystemImageRootHashFile")
                    .await
            }
            "SystemImageCanonicalMetadata" => {
                handlers::images::send_component(
                    self,
                    "Ap,SystemVolumeCanonicalMetadata",
                    "SystemImageCanonicalMetadataFile",
                )
                .await
            }
            "NORData" => handlers::nor::send_nor_data(self, message).await,
            "BasebandData" => handlers::baseband::send_baseband_data(self, message).await,
            // The trust payload travels over FDR; the daemon only wants
            // the acknowledgement here.
            "FDRTrustData" => self.send_reply(Dictionary::new()).await,
            "FUDData" => {
                handlers::images::send_image_family(self, message, handlers::images::FUD).await
            }
            "PersonalizedData" => {
                handlers::images::send_image_family(self, message, handlers::images::PERSONALIZED)
                    .await
            }
            "EANData" => {
                handlers::images::send_image_family(self, message, handlers::images::EAN).await
            }
            "FirmwareUpdaterData" => {
                handlers::fwupdate::send_firmware_updater_data(self, message).await
            }
            "BootabilityBundle" => {
                handlers::bootability::send_bootability_bundle(self, message).await
            }
            other => {
                info!("Unknown data request {other}, ignoring");
                Ok(())
            }
        };

        if result.is_err() {
            error!("ERROR: Unable to send {data_type}");
        }
        result
    }

    async fn handle_status(&mut self, message: &Message) -> Result<(), RestoreError> {
        let raw = message
            .body
            .get("Status")
            .and_then(|v| {
                v.as_unsigned_integer()
                    .or_else(|| v.as_signed_integer().map(|s| s as u64))
            })
            .ok_or(RestoreError::MalformedMessage {
                msg_type: "StatusMsg",
                reason: "missing Status",
            })?;
        let code = StatusCode::from(raw);

        // Every status is terminal
        self.ctx.quit = true;

        if code == StatusCode::Finished {
            info!("Status: {}", code.describe());
            let mut ack = Dictionary::new();
            ack.insert("MsgType".into(), string("ReceivedFinalStatusMsg"));
            self.transport.send(ack).await?;
            Ok(())
        } else {
            error!("Status: {} ({raw})", code.describe());
            Err(RestoreError::Status { code })
        }
    }

    fn handle_progress(&mut self, message: &Message) {
        let Some(operation) = message.body.uint_item("Operation") else {
            debug!("Progress message without an operation");
            return;
        };
        let operation = adjust_operation(operation, self.ctx.protocol_version);
        let progress = message.body.uint_item("Progress").unwrap_or(0);
        let changed = self.ctx.last_operation != Some(operation);
        self.ctx.last_operation = Some(operation);

        if changed {
            match operation_name(operation) {
                Some(name) => info!("Device is now: {name}"),
                None => info!("Unrecognized progress operation {operation}"),
            }
        }

        if (1..=100).contains(&progress) {
            if let Some(bucket) = progress_bucket(operation) {
                self.ctx.notify_progress(bucket, progress as f64);
            }
        } else if changed {
            info!("Operation {operation} reported out-of-range progress {progress}");
        }
    }

    async fn send_filesystem(&mut self) -> Result<(), RestoreError> {
        if self.ctx.filesystem_path.is_none() {
            let os_path = self
                .ctx
                .build_identity
                .component_path("OS")
                .ok_or_else(|| RestoreError::MissingComponent("OS".into()))?
                .to_string();
            let target = self.ctx.scratch_dir()?.join("filesystem.dmg");
            info!("Extracting filesystem from the IPSW");
            self.ctx.ipsw.extract_to_file(&os_path, &target)?;
            self.ctx.filesystem_path = Some(target);
        }
        let path = self
            .ctx
            .filesystem_path
            .clone()
            .ok_or_else(|| RestoreError::MissingComponent("OS".into()))?;

        info!("Streaming filesystem");
        let ctx = &self.ctx;
        let progress = move |pct: f64| ctx.notify_progress(ProgressBucket::VerifyFs, pct);
        self.asr.send_payload(&path, &progress).await?;

        Ok(())
    }

    async fn save_updater_output(&mut self, message: &Message) -> Result<(), RestoreError> {
        let port = message.data_port().ok_or(RestoreError::MalformedMessage {
            msg_type: "BasebandUpdaterOutputData",
            reason: "missing DataPort",
        })?;
        let mut stream = self.open_data_port(port).await?;

        let filename = format!(
            "updater_output-{}.cpio",
            sanitize_udid(&self.ctx.device.udid)
        );
        let mut file = tokio::fs::File::create(&filename).await?;
        let copied = tokio::io::copy(&mut stream, &mut file).await?;
        info!("Saved {copied} bytes of baseband updater output to {filename}");

        Ok(())
    }

    pub(crate) async fn open_data_port(
        &mut self,
        port: u16,
    ) -> Result<T::DataPort, RestoreError> {
        let mut delays = FixedInterval::from_millis(DATA_PORT_CONNECT_INTERVAL_MS)
            .take(DATA_PORT_CONNECT_ATTEMPTS - 1);
        loop {
            match self.transport.open_data_port(port).await {
                Ok(stream) => return Ok(stream),
                Err(err) => match delays.next() {
                    Some(delay) => {
                        debug!("Data port {port} not ready ({err})");
                        sleep(delay).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }

    pub(crate) async fn send_reply(&mut self, reply: Dictionary) -> Result<(), RestoreError> {
        self.transport.send(reply).await?;
        Ok(())
    }

    /// Sends the reboot request and waits for the external mode-change
    /// notifier to confirm the device actually went away.
    pub async fn reboot(&mut self) -> Result<(), RestoreError> {
        info!("Rebooting device");
        self.transport.reboot().await?;

        let observed = timeout(
            Duration::from_secs(REBOOT_TIMEOUT_SECS),
            self.ctx.device_event.notified(),
        )
        .await;
        if observed.is_err() {
            return Err(RestoreError::RebootTimeout(REBOOT_TIMEOUT_SECS));
        }

        Ok(())
    }
}

fn type_set(names: &[&str]) -> Dictionary {
    let mut set = Dictionary::new();
    for name in names {
        set.insert((*name).into(), boolean(true));
    }
    set
}

fn handle_checkpoint(message: &Message) {
    let id = message.body.uint_item("CHECKPOINT_ID").unwrap_or(0);
    let result = message
        .body
        .get("CHECKPOINT_RESULT")
        .and_then(Value::as_signed_integer)
        .unwrap_or(0);
    if result == 0 {
        debug!("Checkpoint {id} passed");
    } else {
        warn!("Checkpoint {id} failed with result {result}");
    }
}
