//! Shared, reference-counted format sets for filter-graph negotiation.
//!
//! Link ends reference pixel/sample format lists, sample-rate lists and
//! channel-layout sets held in a [`SetRegistry`]. Negotiating a link merges the
//! two sets its ends reference into their intersection and repoints every
//! reference, so narrowing a shared set is seen by all links that share it.

pub mod dsl;
pub mod error;
pub mod format;
pub mod graph;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod layout;
pub mod list;
pub mod merge;
pub mod registry;
pub mod validate;

pub use error::{FormatsError, IntegrityKind, MergeOutcome, Result};
pub use format::{BuiltinCatalog, FormatCatalog, FormatId, MediaType, PixelFormat, SampleFormat};
pub use graph::{Graph, GraphError, LinkId, LinkNegotiation, NodeId, PadId, SetKind};
pub use layout::{ChannelLayout, ChannelLayouts};
pub use list::FormatList;
pub use merge::{
    can_merge_channel_layouts, can_merge_formats, can_merge_samplerates, merge_channel_layouts,
    merge_formats, merge_samplerates,
};
pub use registry::{SetId, SetRegistry, SlotId};
