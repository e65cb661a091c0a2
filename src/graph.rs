//! Graph module: filter nodes, typed pads and the links whose ends hold format-set references.
//!
//! Every link has two ends. The source end is described by the producing
//! filter's output pad, the destination end by the consuming filter's input
//! pad. Each end owns one slot per set kind; negotiating a link merges the sets
//! referenced by its two ends.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::error::{MergeOutcome, Result};
use crate::format::{FormatCatalog, FormatId, MediaType};
use crate::invariant_ppt::{assert_invariant, NEGOTIATION_CONVERGES};
use crate::layout::{ChannelLayout, ChannelLayouts};
use crate::list::FormatList;
use crate::merge::{
    can_merge_channel_layouts, can_merge_formats, can_merge_samplerates, merge_channel_layouts,
    merge_formats, merge_samplerates,
};
use crate::registry::{SetRegistry, SlotId};

/// Unique identifier for a filter node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of a pad within a node's input or output pad list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadId(pub usize);

/// Unique identifier for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub usize);

/// A pad with its media type.
#[derive(Debug, Clone, PartialEq)]
pub struct Pad {
    /// Position of the pad on its node.
    pub id: PadId,
    /// Media carried through this pad.
    pub media: MediaType,
}

/// Names one pad of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadRef {
    /// An input pad.
    Input(PadId),
    /// An output pad.
    Output(PadId),
}

/// The kinds of set negotiated on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    /// Pixel or sample formats.
    Formats,
    /// Audio sample rates.
    SampleRates,
    /// Audio channel layouts.
    ChannelLayouts,
}

impl SetKind {
    fn slot(self, end: &LinkEnd) -> SlotId {
        match self {
            SetKind::Formats => end.formats,
            SetKind::SampleRates => end.samplerates,
            SetKind::ChannelLayouts => end.channel_layouts,
        }
    }

    fn applies_to(self, media: MediaType) -> bool {
        self == SetKind::Formats || media.is_audio()
    }
}

/// The reference slots of one link end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEnd {
    /// Slot in [`Graph::formats`].
    pub formats: SlotId,
    /// Slot in [`Graph::samplerates`].
    pub samplerates: SlotId,
    /// Slot in [`Graph::channel_layouts`].
    pub channel_layouts: SlotId,
}

/// A requested connection between an output pad and an input pad.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// The source node ID.
    pub from_node: NodeId,
    /// The source output pad.
    pub from_pad: PadId,
    /// The destination node ID.
    pub to_node: NodeId,
    /// The destination input pad.
    pub to_pad: PadId,
    /// Media carried by the link.
    pub media: MediaType,
}

/// A link between two filters.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// The unique ID of this link.
    pub id: LinkId,
    /// The source node ID.
    pub from_node: NodeId,
    /// The source output pad.
    pub from_pad: PadId,
    /// The destination node ID.
    pub to_node: NodeId,
    /// The destination input pad.
    pub to_pad: PadId,
    /// Media carried by the link.
    pub media: MediaType,
    /// Slots filled by the producing filter.
    pub src: LinkEnd,
    /// Slots filled by the consuming filter.
    pub dst: LinkEnd,
}

/// A filter node in the graph.
#[derive(Debug, Clone)]
pub struct FilterNode {
    /// The unique ID of this node.
    pub id: NodeId,
    /// Instance name, used as diagnostic context.
    pub name: String,
    /// The input pads of this node.
    pub inputs: Vec<Pad>,
    /// The output pads of this node.
    pub outputs: Vec<Pad>,
}

impl FilterNode {
    /// Media type used when the node has no opinion of its own.
    pub fn default_media(&self) -> MediaType {
        self.inputs
            .first()
            .or_else(|| self.outputs.first())
            .map_or(MediaType::Video, |p| p.media)
    }
}

/// Outcome of negotiating every set kind on one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkNegotiation {
    /// Every kind that both ends specified was merged.
    Merged,
    /// This kind has no common value; nothing on the link was changed.
    Incompatible(SetKind),
}

/// The filter graph: nodes, links and the registries their link ends point into.
#[derive(Debug, Default)]
pub struct Graph {
    /// All nodes in the graph (None for removed nodes).
    pub nodes: Vec<Option<FilterNode>>,
    /// All links (None for removed links).
    pub links: Vec<Option<Link>>,
    /// Format sets referenced by link ends.
    pub formats: SetRegistry<FormatList>,
    /// Sample-rate sets referenced by link ends.
    pub samplerates: SetRegistry<FormatList>,
    /// Channel-layout sets referenced by link ends.
    pub channel_layouts: SetRegistry<ChannelLayouts>,
}

/// Errors that can occur when building or querying the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Connected pads carry different media.
    MediaMismatch,
    /// Adding the link would create a cycle.
    CycleDetected,
    /// Pad index out of bounds.
    InvalidPad,
    /// Node does not exist.
    InvalidNode,
    /// Link does not exist.
    InvalidLink,
    /// Pad already has a link.
    PadAlreadyConnected,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter with one pad per listed media type.
    pub fn add_filter(
        &mut self,
        name: &str,
        inputs: &[MediaType],
        outputs: &[MediaType],
    ) -> NodeId {
        let pads = |media: &[MediaType]| -> Vec<Pad> {
            media
                .iter()
                .enumerate()
                .map(|(i, &media)| Pad { id: PadId(i), media })
                .collect()
        };
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(FilterNode {
            id,
            name: name.to_string(),
            inputs: pads(inputs),
            outputs: pads(outputs),
        }));
        tracing::debug!("graph_add: filter {} '{}'", id.0, name);
        id
    }

    /// Look up a live node.
    pub fn node(&self, id: NodeId) -> Option<&FilterNode> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    /// Look up a live link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.0).and_then(|l| l.as_ref())
    }

    /// Live links, in creation order.
    pub fn live_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().flatten()
    }

    /// Add a link, validating pads, media and acyclicity.
    pub fn add_link(&mut self, edge: Edge) -> std::result::Result<LinkId, GraphError> {
        let from = self.node(edge.from_node).ok_or(GraphError::InvalidNode)?;
        let to = self.node(edge.to_node).ok_or(GraphError::InvalidNode)?;
        let out_pad = from
            .outputs
            .get(edge.from_pad.0)
            .ok_or(GraphError::InvalidPad)?;
        let in_pad = to.inputs.get(edge.to_pad.0).ok_or(GraphError::InvalidPad)?;

        if out_pad.media != edge.media || in_pad.media != edge.media {
            return Err(GraphError::MediaMismatch);
        }
        if self.output_link(edge.from_node, edge.from_pad).is_some()
            || self.input_link(edge.to_node, edge.to_pad).is_some()
        {
            return Err(GraphError::PadAlreadyConnected);
        }
        if self.reaches(edge.to_node, edge.from_node) {
            return Err(GraphError::CycleDetected);
        }

        let id = LinkId(self.links.len());
        let src = self.new_end();
        let dst = self.new_end();
        self.links.push(Some(Link {
            id,
            from_node: edge.from_node,
            from_pad: edge.from_pad,
            to_node: edge.to_node,
            to_pad: edge.to_pad,
            media: edge.media,
            src,
            dst,
        }));
        tracing::debug!(
            "graph_link: {}:{} -> {}:{}",
            edge.from_node.0,
            edge.from_pad.0,
            edge.to_node.0,
            edge.to_pad.0
        );
        Ok(id)
    }

    /// Remove a node, its links, and every reference their ends held.
    pub fn remove_node(&mut self, node_id: NodeId) -> std::result::Result<(), GraphError> {
        if self.node(node_id).is_none() {
            return Err(GraphError::InvalidNode);
        }
        self.nodes[node_id.0] = None;
        for slot in self.links.iter_mut() {
            let touches = slot
                .as_ref()
                .is_some_and(|l| l.from_node == node_id || l.to_node == node_id);
            if !touches {
                continue;
            }
            if let Some(link) = slot.take() {
                for end in [link.src, link.dst] {
                    self.formats.release_slot(end.formats);
                    self.samplerates.release_slot(end.samplerates);
                    self.channel_layouts.release_slot(end.channel_layouts);
                }
            }
        }
        tracing::debug!("graph_remove: filter {}", node_id.0);
        Ok(())
    }

    /// The link end attached to one pad of a node.
    pub fn pad_end(&self, node: NodeId, pad: PadRef) -> std::result::Result<LinkEnd, GraphError> {
        let filter = self.node(node).ok_or(GraphError::InvalidNode)?;
        match pad {
            PadRef::Input(id) => {
                filter.inputs.get(id.0).ok_or(GraphError::InvalidPad)?;
                self.input_link(node, id)
                    .map(|l| l.dst)
                    .ok_or(GraphError::InvalidLink)
            }
            PadRef::Output(id) => {
                filter.outputs.get(id.0).ok_or(GraphError::InvalidPad)?;
                self.output_link(node, id)
                    .map(|l| l.src)
                    .ok_or(GraphError::InvalidLink)
            }
        }
    }

    /// Reference `formats` from every connected pad of `node` that has none yet.
    ///
    /// If no pad qualifies the list is dropped. On failure no pad references it.
    pub fn set_common_formats(&mut self, node: NodeId, formats: FormatList) -> Result<()> {
        let slots = self.eligible_slots(node, SetKind::Formats)?;
        self.formats.attach(formats, &slots)?;
        Ok(())
    }

    /// [`Graph::set_common_formats`] with an explicit list of formats.
    pub fn set_common_formats_from_list(
        &mut self,
        node: NodeId,
        formats: &[FormatId],
    ) -> Result<()> {
        self.set_common_formats(node, FormatList::from_slice(formats))
    }

    /// Reference `rates` from every connected audio pad of `node` that has none yet.
    pub fn set_common_samplerates(&mut self, node: NodeId, rates: FormatList) -> Result<()> {
        let slots = self.eligible_slots(node, SetKind::SampleRates)?;
        self.samplerates.attach(rates, &slots)?;
        Ok(())
    }

    /// [`Graph::set_common_samplerates`] with an explicit list of rates.
    pub fn set_common_samplerates_from_list(
        &mut self,
        node: NodeId,
        rates: &[i32],
    ) -> Result<()> {
        self.set_common_samplerates(node, FormatList::from_slice(rates))
    }

    /// [`Graph::set_common_samplerates`] with the "any rate" list.
    pub fn set_common_all_samplerates(&mut self, node: NodeId) -> Result<()> {
        self.set_common_samplerates(node, FormatList::all_samplerates())
    }

    /// Reference `layouts` from every connected audio pad of `node` that has none yet.
    pub fn set_common_channel_layouts(
        &mut self,
        node: NodeId,
        layouts: ChannelLayouts,
    ) -> Result<()> {
        let slots = self.eligible_slots(node, SetKind::ChannelLayouts)?;
        self.channel_layouts.attach(layouts, &slots)?;
        Ok(())
    }

    /// [`Graph::set_common_channel_layouts`] with an explicit list of layouts.
    pub fn set_common_channel_layouts_from_list(
        &mut self,
        node: NodeId,
        layouts: &[ChannelLayout],
    ) -> Result<()> {
        let list = ChannelLayouts::from_slice(layouts)?;
        self.set_common_channel_layouts(node, list)
    }

    /// [`Graph::set_common_channel_layouts`] with every channel count.
    pub fn set_common_all_channel_counts(&mut self, node: NodeId) -> Result<()> {
        self.set_common_channel_layouts(node, ChannelLayouts::all_counts())
    }

    /// Fallback for filters without a format query of their own.
    ///
    /// Every format of the node's media type; audio nodes also accept every
    /// channel count and every sample rate.
    pub fn default_query_formats(
        &mut self,
        node: NodeId,
        catalog: &impl FormatCatalog,
    ) -> Result<()> {
        let media = self
            .node(node)
            .ok_or(GraphError::InvalidNode)?
            .default_media();
        self.set_common_formats(node, FormatList::all_formats(media, catalog))?;
        if media.is_audio() {
            self.set_common_all_channel_counts(node)?;
            self.set_common_all_samplerates(node)?;
        }
        Ok(())
    }

    /// Merge the sets on both ends of a link.
    ///
    /// Every applicable kind is checked before anything is merged, so an
    /// incompatible kind leaves the whole link untouched. Kinds where either end
    /// has no set yet are skipped.
    pub fn negotiate_link(
        &mut self,
        link: LinkId,
        catalog: &impl FormatCatalog,
    ) -> Result<LinkNegotiation> {
        let link = self.link(link).ok_or(GraphError::InvalidLink)?.clone();
        let kinds = [SetKind::Formats, SetKind::SampleRates, SetKind::ChannelLayouts];

        for kind in kinds.into_iter().filter(|k| k.applies_to(link.media)) {
            if !self.ends_compatible(&link, kind, catalog) {
                tracing::debug!("negotiate: link {} incompatible on {:?}", link.id.0, kind);
                return Ok(LinkNegotiation::Incompatible(kind));
            }
        }

        for kind in kinds.into_iter().filter(|k| k.applies_to(link.media)) {
            let (src, dst) = (kind.slot(&link.src), kind.slot(&link.dst));
            let outcome = match kind {
                SetKind::Formats => match (self.formats.get(src), self.formats.get(dst)) {
                    (Some(a), Some(b)) => {
                        merge_formats(&mut self.formats, a, b, link.media, catalog)?
                    }
                    _ => continue,
                },
                SetKind::SampleRates => {
                    match (self.samplerates.get(src), self.samplerates.get(dst)) {
                        (Some(a), Some(b)) => merge_samplerates(&mut self.samplerates, a, b)?,
                        _ => continue,
                    }
                }
                SetKind::ChannelLayouts => {
                    match (self.channel_layouts.get(src), self.channel_layouts.get(dst)) {
                        (Some(a), Some(b)) => {
                            merge_channel_layouts(&mut self.channel_layouts, a, b)?
                        }
                        _ => continue,
                    }
                }
            };
            if outcome == MergeOutcome::Incompatible {
                return Ok(LinkNegotiation::Incompatible(kind));
            }
            assert_invariant(
                NEGOTIATION_CONVERGES,
                self.ends_share_set(&link, kind),
                "Both link ends reference the merged set",
                Some("negotiate_link"),
            );
        }
        tracing::debug!("negotiate: link {} merged", link.id.0);
        Ok(LinkNegotiation::Merged)
    }

    /// Split `link` around `node`: the original source now feeds `in_pad`,
    /// and `out_pad` feeds the original destination through a new link.
    ///
    /// Sets already referenced by the destination end move to the new link.
    pub fn insert_filter(
        &mut self,
        link: LinkId,
        node: NodeId,
        in_pad: PadId,
        out_pad: PadId,
    ) -> Result<LinkId> {
        let old = self.link(link).ok_or(GraphError::InvalidLink)?.clone();
        let filter = self.node(node).ok_or(GraphError::InvalidNode)?;
        let input = filter.inputs.get(in_pad.0).ok_or(GraphError::InvalidPad)?;
        let output = filter.outputs.get(out_pad.0).ok_or(GraphError::InvalidPad)?;
        if input.media != old.media || output.media != old.media {
            return Err(GraphError::MediaMismatch.into());
        }
        if self.input_link(node, in_pad).is_some() || self.output_link(node, out_pad).is_some() {
            return Err(GraphError::PadAlreadyConnected.into());
        }
        if node == old.from_node
            || node == old.to_node
            || self.reaches(node, old.from_node)
            || self.reaches(old.to_node, node)
        {
            return Err(GraphError::CycleDetected.into());
        }

        let id = LinkId(self.links.len());
        let src = self.new_end();
        let dst = self.new_end();
        self.formats.change_reference(old.dst.formats, dst.formats)?;
        self.samplerates
            .change_reference(old.dst.samplerates, dst.samplerates)?;
        self.channel_layouts
            .change_reference(old.dst.channel_layouts, dst.channel_layouts)?;

        self.links.push(Some(Link {
            id,
            from_node: node,
            from_pad: out_pad,
            to_node: old.to_node,
            to_pad: old.to_pad,
            media: old.media,
            src,
            dst,
        }));
        if let Some(Some(original)) = self.links.get_mut(link.0) {
            original.to_node = node;
            original.to_pad = in_pad;
        }
        tracing::debug!("graph_insert: filter {} on link {}, new link {}", node.0, link.0, id.0);
        Ok(id)
    }

    fn new_end(&mut self) -> LinkEnd {
        LinkEnd {
            formats: self.formats.new_slot(),
            samplerates: self.samplerates.new_slot(),
            channel_layouts: self.channel_layouts.new_slot(),
        }
    }

    fn input_link(&self, node: NodeId, pad: PadId) -> Option<&Link> {
        self.live_links()
            .find(|l| l.to_node == node && l.to_pad == pad)
    }

    fn output_link(&self, node: NodeId, pad: PadId) -> Option<&Link> {
        self.live_links()
            .find(|l| l.from_node == node && l.from_pad == pad)
    }

    fn is_vacant(&self, kind: SetKind, slot: SlotId) -> bool {
        match kind {
            SetKind::Formats => self.formats.get(slot).is_none(),
            SetKind::SampleRates => self.samplerates.get(slot).is_none(),
            SetKind::ChannelLayouts => self.channel_layouts.get(slot).is_none(),
        }
    }

    /// Slots of `node`'s connected pads that can take a `kind` set, inputs first.
    fn eligible_slots(&self, node: NodeId, kind: SetKind) -> Result<Vec<SlotId>> {
        let filter = self.node(node).ok_or(GraphError::InvalidNode)?;
        let inputs = filter
            .inputs
            .iter()
            .filter_map(|pad| self.input_link(node, pad.id))
            .map(|l| (l.media, l.dst));
        let outputs = filter
            .outputs
            .iter()
            .filter_map(|pad| self.output_link(node, pad.id))
            .map(|l| (l.media, l.src));
        Ok(inputs
            .chain(outputs)
            .filter(|(media, _)| kind.applies_to(*media))
            .map(|(_, end)| kind.slot(&end))
            .filter(|&slot| self.is_vacant(kind, slot))
            .collect())
    }

    fn ends_compatible(&self, link: &Link, kind: SetKind, catalog: &impl FormatCatalog) -> bool {
        let (src, dst) = (kind.slot(&link.src), kind.slot(&link.dst));
        match kind {
            SetKind::Formats => {
                both_or_skip(&self.formats, src, dst, |a, b| {
                    can_merge_formats(a, b, link.media, catalog)
                })
            }
            SetKind::SampleRates => {
                both_or_skip(&self.samplerates, src, dst, can_merge_samplerates)
            }
            SetKind::ChannelLayouts => {
                both_or_skip(&self.channel_layouts, src, dst, can_merge_channel_layouts)
            }
        }
    }

    fn ends_share_set(&self, link: &Link, kind: SetKind) -> bool {
        let (src, dst) = (kind.slot(&link.src), kind.slot(&link.dst));
        match kind {
            SetKind::Formats => self.formats.get(src) == self.formats.get(dst),
            SetKind::SampleRates => self.samplerates.get(src) == self.samplerates.get(dst),
            SetKind::ChannelLayouts => {
                self.channel_layouts.get(src) == self.channel_layouts.get(dst)
            }
        }
    }

    /// Whether `target` is reachable from `start` along live links.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        self.dfs(start, target, &mut visited)
    }

    fn dfs(&self, current: NodeId, target: NodeId, visited: &mut [bool]) -> bool {
        if current == target {
            return true;
        }
        if visited[current.0] {
            return false;
        }
        visited[current.0] = true;
        for link in self.live_links() {
            if link.from_node == current && self.dfs(link.to_node, target, visited) {
                return true;
            }
        }
        false
    }
}

/// Compatible when the two slots reference the same set, when either is unset,
/// or when `check` accepts their contents.
fn both_or_skip<S>(
    registry: &SetRegistry<S>,
    src: SlotId,
    dst: SlotId,
    check: impl Fn(&S, &S) -> bool,
) -> bool {
    match (registry.get(src), registry.get(dst)) {
        (Some(a), Some(b)) if a == b => true,
        (Some(a), Some(b)) => match (registry.contents(a), registry.contents(b)) {
            (Some(ca), Some(cb)) => check(ca, cb),
            _ => true,
        },
        _ => true,
    }
}
