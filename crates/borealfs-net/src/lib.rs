#![warn(missing_docs)]

//! BorealFS network subsystem: interface lifecycle, transport driver
//! registration, cookie-based wire handles, and fixed-capacity descriptor
//! pools.
//!
//! The [`net::Net`] context owns all writable state; transport drivers are
//! external collaborators implementing [`nal::NalDriver`].

pub mod ctl;
pub mod error;
pub mod freelist;
pub mod handle;
pub mod nal;
pub mod net;
pub mod ni;
pub mod nid;
pub mod types;
pub mod wire;

pub use ctl::{CtlCommand, CtlReply, Router};
pub use error::{NetError, NetResult};
pub use freelist::Pool;
pub use handle::{CookieType, HandleTable, COOKIE_TYPES};
pub use nal::{LoopbackDriver, NalDriver};
pub use net::{Net, NetConfig, NiRef};
pub use ni::{NetInterface, NiState};
pub use nid::{parse_networks, NalType, NetId, Nid};
pub use types::{EventQueue, MatchEntry, MemDesc, Msg};
pub use wire::WireHandle;
