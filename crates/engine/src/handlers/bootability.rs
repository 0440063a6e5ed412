//! Bootability bundle streaming.
//!
//! The bundle members are pulled out of the IPSW and pushed down a
//! secondary data port as a CPIO odc stream, uid/gid zeroed, ending with
//! the trailer record.

use log::{debug, info};
use restore_protocol::cpio::OdcRecord;
use restore_protocol::message::Message;
use tokio::io::AsyncWriteExt;

use crate::asr::Asr;
use crate::error::RestoreError;
use crate::ipsw::{MemberInfo, MemberKind};
use crate::session::Session;
use crate::transport::RestoreTransport;
use crate::tss::TicketServer;

const BUNDLE_PREFIX: &str = "BootabilityBundle/Restore/Bootability/";
const TRUSTCACHE_SRC: &str = "BootabilityBundle/Restore/Firmware/Bootability.dmg.trustcache";
const TRUSTCACHE_DST: &str = "Bootability.trustcache";

pub(crate) async fn send_bootability_bundle<T, X, A>(
    session: &mut Session<T, X, A>,
    msg: &Message,
) -> Result<(), RestoreError>
where
    T: RestoreTransport,
    X: TicketServer,
    A: Asr,
{
    let port = msg.data_port().ok_or(RestoreError::MalformedMessage {
        msg_type: "DataRequestMsg",
        reason: "bootability bundle request has no DataPort",
    })?;

    let mut members: Vec<(String, String, MemberInfo)> = Vec::new();
    session.ctx.ipsw.list_contents(&mut |name, info| {
        let subpath = if name == TRUSTCACHE_SRC {
            Some(TRUSTCACHE_DST.to_string())
        } else {
            name.strip_prefix(BUNDLE_PREFIX).map(String::from)
        };
        if let Some(subpath) = subpath {
            members.push((subpath, name.to_string(), *info));
        }
    })?;
    info!("Streaming bootability bundle ({} members)", members.len());

    let mut stream = session.open_data_port(port).await?;
    for (subpath, path, info) in members {
        let payload = match info.kind {
            MemberKind::Regular | MemberKind::Symlink if info.size > 0 => {
                session.ctx.ipsw.extract_to_memory(&path)?
            }
            _ => Vec::new(),
        };
        debug!("Bundling {subpath} ({} bytes)", payload.len());

        let record = OdcRecord {
            name: &subpath,
            mode: info.mode,
            // uid/gid are scrubbed; the device applies its own ownership
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: info.mtime,
            data: &payload,
            ..Default::default()
        };
        stream.write_all(&record.encode()).await?;
    }

    stream.write_all(&OdcRecord::trailer()).await?;
    stream.shutdown().await?;

    Ok(())
}
