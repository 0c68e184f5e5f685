//! Priority-ordered registry of candidate input sources.
//!
//! Fan-in elements (speaker mixers, source muxes) pick their next read from
//! the highest-priority source currently holding data. The list stays sorted
//! by non-increasing priority; entries of equal priority keep their relative
//! insertion order (new equals append after existing ones).

use crate::error::{Error, Result};
use crate::port::Port;

/// One candidate input source with its stream parameters.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Caller-assigned source id, unique within one list.
    pub port_id: u8,
    /// Selection priority; higher wins.
    pub priority: u8,
    /// The source's port, or `None` to drop the entry on update.
    pub port: Option<Port>,
    /// Channel count of the source stream.
    pub channels: u8,
    /// Sample rate of the source stream in Hz.
    pub sample_rate: u32,
    /// Digital gain applied when mixing this source.
    pub digital_gain: i16,
    /// Analog gain applied when mixing this source.
    pub analog_gain: i16,
    /// Bit depth of the source stream.
    pub bits: u8,
}

impl Default for PortInfo {
    fn default() -> Self {
        Self {
            port_id: 0,
            priority: 0,
            port: None,
            channels: 1,
            sample_rate: 16_000,
            digital_gain: 0,
            analog_gain: 0,
            bits: 16,
        }
    }
}

/// Priority-sorted list of input sources.
///
/// # Example
///
/// ```rust
/// use tributary::port::{Port, PortInfo, PortInfoList};
///
/// let mut list = PortInfoList::new();
/// list.add(PortInfo {
///     port_id: 1,
///     priority: 5,
///     port: Some(Port::ring(256).unwrap()),
///     ..Default::default()
/// });
/// assert_eq!(list.get_valid_port_id(), None); // nothing holds data yet
/// ```
#[derive(Debug, Default)]
pub struct PortInfoList {
    items: Vec<PortInfo>,
}

impl PortInfoList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an entry at its priority-correct position.
    ///
    /// The insertion scans for the last existing entry of equal-or-higher
    /// priority and places the new one after it, so equal priorities stay in
    /// arrival order.
    pub fn add(&mut self, info: PortInfo) {
        let pos = self
            .items
            .iter()
            .rposition(|item| item.priority >= info.priority)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.items.insert(pos, info);
    }

    /// Replace the entry with the matching id.
    ///
    /// The old entry is removed first. If `info.port` is `None` the source is
    /// dropped permanently; otherwise the updated entry is reinserted at its
    /// priority-correct position. Updating an id that was never added is an
    /// error.
    pub fn update(&mut self, info: PortInfo) -> Result<()> {
        let existing = self
            .items
            .iter()
            .position(|item| item.port_id == info.port_id);
        if let Some(index) = existing {
            self.items.remove(index);
        }
        if info.port.is_none() {
            return Ok(());
        }
        if existing.is_none() {
            return Err(Error::UnknownPortId(info.port_id));
        }
        self.add(info);
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Id of the highest-priority source currently holding data, scanning in
    /// priority order, or `None` when no source has anything pending.
    pub fn get_valid_port_id(&self) -> Option<u8> {
        self.items
            .iter()
            .find(|item| {
                item.port
                    .as_ref()
                    .map(|port| port.filled_size() > 0)
                    .unwrap_or(false)
            })
            .map(|item| item.port_id)
    }

    /// Look up an entry by id.
    pub fn get_by_port_id(&self, port_id: u8) -> Option<&PortInfo> {
        self.items.iter().find(|item| item.port_id == port_id)
    }

    /// Entries in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &PortInfo> {
        self.items.iter()
    }
}
