//! Data-request handlers.
//!
//! One module per request family; the dispatcher in `session` routes an
//! inbound `DataRequestMsg` here by its `DataType`. Handlers send their
//! own replies: most are a single dictionary, the boot objects stream
//! chunks, and the bootability bundle writes straight to a data port.

pub(crate) mod baseband;
pub(crate) mod boot_object;
pub(crate) mod bootability;
pub(crate) mod fwupdate;
pub(crate) mod images;
pub(crate) mod nor;
pub(crate) mod tickets;
