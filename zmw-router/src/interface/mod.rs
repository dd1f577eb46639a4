//! Service interface documents
//!
//! - **Types**: `types.rs` - typed core schema decoded from discovery replies
//! - **Enrichment**: `enrichment.rs` - per-service extras (context text and
//!   closed value domains)

pub mod enrichment;
pub mod types;

pub use enrichment::{Enricher, EnricherRegistry, ValueDomains};
pub use types::{
    classify_param, strip_reply_hint, Announcement, Command, ParamSpec, Requirement,
    ServiceInterface, DISCOVERY_COMMAND,
};
