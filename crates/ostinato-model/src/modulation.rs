//! Modulation registry: sources, targets, and links between chain devices.

use ostinato_core::Uid16;
use thiserror::Error;

use crate::chain::TrackChain;

/// Sentinel asking the registry to allocate the next link id.
pub const MOD_LINK_ID_AUTO: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ModRate {
    #[default]
    Block = 0,
    Sample = 1,
}

impl ModRate {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Block),
            1 => Some(Self::Sample),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ModSourceKind {
    #[default]
    Macro = 0,
    Lfo = 1,
    Envelope = 2,
    PatcherNodeOutput = 3,
}

impl ModSourceKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Macro),
            1 => Some(Self::Lfo),
            2 => Some(Self::Envelope),
            3 => Some(Self::PatcherNodeOutput),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ModTargetKind {
    #[default]
    VstParam = 0,
    PatcherParam = 1,
    PatcherMacro = 2,
}

impl ModTargetKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::VstParam),
            1 => Some(Self::PatcherParam),
            2 => Some(Self::PatcherMacro),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModSourceRef {
    pub device_id: u32,
    pub source_id: u32,
    pub kind: ModSourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModTargetRef {
    pub device_id: u32,
    pub target_id: u32,
    pub kind: ModTargetKind,
    pub uid16: Uid16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModSourceState {
    pub source: ModSourceRef,
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModLink {
    pub link_id: u32,
    pub source: ModSourceRef,
    pub target: ModTargetRef,
    pub depth: f32,
    pub bias: f32,
    pub rate: ModRate,
    pub enabled: bool,
}

/// Why a link could not be added.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModLinkError {
    #[error("source device does not exist in the chain")]
    MissingSourceDevice,
    #[error("target device does not exist in the chain")]
    MissingTargetDevice,
    #[error("source device must precede target device in chain order")]
    OrderViolation,
    #[error("link id already exists")]
    LinkExists,
}

/// Per-track modulation state.
#[derive(Debug, Clone, Default)]
pub struct ModRegistry {
    sources: Vec<ModSourceState>,
    links: Vec<ModLink>,
    next_link_id: u32,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[ModSourceState] {
        &self.sources
    }

    pub fn links(&self) -> &[ModLink] {
        &self.links
    }

    pub fn find_link(&self, link_id: u32) -> Option<&ModLink> {
        self.links.iter().find(|l| l.link_id == link_id)
    }

    /// Set (or create) a source's current value.
    pub fn set_source_value(&mut self, source: ModSourceRef, value: f32) {
        match self.sources.iter_mut().find(|s| s.source == source) {
            Some(state) => state.value = value,
            None => self.sources.push(ModSourceState { source, value }),
        }
    }

    pub fn source_value(&self, source: ModSourceRef) -> Option<f32> {
        self.sources.iter().find(|s| s.source == source).map(|s| s.value)
    }

    /// Add a link. A link is valid only when the source device precedes the
    /// target device in chain order.
    pub fn add_link(&mut self, chain: &TrackChain, mut link: ModLink) -> Result<u32, ModLinkError> {
        let source_pos = chain
            .position(link.source.device_id)
            .ok_or(ModLinkError::MissingSourceDevice)?;
        let target_pos = chain
            .position(link.target.device_id)
            .ok_or(ModLinkError::MissingTargetDevice)?;
        if source_pos >= target_pos {
            return Err(ModLinkError::OrderViolation);
        }
        if link.link_id != MOD_LINK_ID_AUTO && self.find_link(link.link_id).is_some() {
            return Err(ModLinkError::LinkExists);
        }
        if link.link_id == MOD_LINK_ID_AUTO {
            link.link_id = self.next_link_id;
        }
        self.next_link_id = self.next_link_id.max(link.link_id + 1);
        let id = link.link_id;
        self.links.push(link);
        Ok(id)
    }

    pub fn remove_link(&mut self, link_id: u32) -> Option<ModLink> {
        let index = self.links.iter().position(|l| l.link_id == link_id)?;
        Some(self.links.remove(index))
    }

    pub fn set_link_uid16(&mut self, link_id: u32, uid16: [u8; 16]) -> bool {
        match self.links.iter_mut().find(|l| l.link_id == link_id) {
            Some(link) => {
                link.target.uid16 = uid16;
                true
            }
            None => false,
        }
    }

    pub fn set_link_enabled(&mut self, link_id: u32, enabled: bool) -> bool {
        match self.links.iter_mut().find(|l| l.link_id == link_id) {
            Some(link) => {
                link.enabled = enabled;
                true
            }
            None => false,
        }
    }
}
