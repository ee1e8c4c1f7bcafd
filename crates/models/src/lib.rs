mod capabilities;
mod event;
mod host_scheme;
mod id;
mod keywords;
mod mapping;
mod monitor;
mod resource;
mod server;
pub mod time;

pub use capabilities::CustomerCapabilities;
pub use event::{Event, EventKind, MonitorStatus};
pub use host_scheme::{HostScheme, HostSchemeUrlError};
pub use id::{CustomerId, EventId, HostSchemeId, MonitorId, RegionId, ServerId};
pub use keywords::{decode_keywords, encode_keywords, KeywordBlobError};
pub use mapping::CustomerMapping;
pub use monitor::{slug_of, ContentCheckMode, HttpMethod, Monitor, PostContentType};
pub use resource::{ActiveResources, Resource, ValueType};
pub use server::{Region, Server, ServerStatus};
