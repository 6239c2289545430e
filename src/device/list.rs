//! Per-type device lists with current/default selection

use crate::audio::{ChannelVolumes, HardwareDevice};
use crate::device::CurrentDevicePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Device direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Sink,
    Source,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Sink => write!(f, "sink"),
            DeviceType::Source => write!(f, "source"),
        }
    }
}

/// Information about a physical audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevInfo {
    pub card_index: u32,
    pub kind: DeviceType,
    /// Volatile index assigned by the hardware
    pub index: u32,
    /// Stable key
    pub name: String,
    pub description: String,
    pub channels: u8,
    pub base_volume: u32,
    /// Volume applied uniformly to every channel
    pub volume: u32,
    pub volume_steps: u32,
    pub is_current: bool,
    pub is_default: bool,
}

impl AudioDevInfo {
    pub fn channel_volumes(&self) -> ChannelVolumes {
        ChannelVolumes::uniform(self.channels, self.volume)
    }
}

impl From<HardwareDevice> for AudioDevInfo {
    fn from(device: HardwareDevice) -> Self {
        Self {
            card_index: device.card_index,
            kind: device.kind,
            index: device.index,
            name: device.name,
            description: device.description,
            channels: device.channels,
            base_volume: device.base_volume,
            volume: device.volume,
            volume_steps: device.volume_steps,
            is_current: false,
            is_default: false,
        }
    }
}

impl fmt::Display for AudioDevInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current_marker = if self.is_current { " *" } else { "" };
        let default_marker = if self.is_default { " (default)" } else { "" };
        write!(
            f,
            "#{} {}{}{}",
            self.index, self.description, current_marker, default_marker
        )
    }
}

/// Result of adding a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New entry appended
    Added { became_current: bool },
    /// Entry with the same name re-detected; volatile fields refreshed
    Updated,
}

/// Result of removing a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: AudioDevInfo,
    /// Index of the device promoted to current, if the removed one was current
    pub replacement: Option<u32>,
}

/// Devices of one type, keyed by name and indexed by hardware index
#[derive(Debug)]
pub struct DeviceList {
    kind: DeviceType,
    devices: Vec<AudioDevInfo>,
    by_index: HashMap<u32, usize>,
}

impl DeviceList {
    pub fn new(kind: DeviceType) -> Self {
        Self {
            kind,
            devices: Vec::new(),
            by_index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> DeviceType {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioDevInfo> {
        self.devices.iter()
    }

    pub fn get(&self, index: u32) -> Option<&AudioDevInfo> {
        self.by_index.get(&index).map(|&pos| &self.devices[pos])
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut AudioDevInfo> {
        match self.by_index.get(&index) {
            Some(&pos) => Some(&mut self.devices[pos]),
            None => None,
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&AudioDevInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn current(&self) -> Option<&AudioDevInfo> {
        self.devices.iter().find(|d| d.is_current)
    }

    /// Add a device, applying current/default precedence
    ///
    /// 1. the first device of an empty list becomes current
    /// 2. a device named like the persisted default becomes current and default
    /// 3. otherwise, while no device is marked default, `policy` may promote
    ///    the device to current (not default)
    pub fn add(
        &mut self,
        mut device: AudioDevInfo,
        default_name: Option<&str>,
        policy: &dyn CurrentDevicePolicy,
    ) -> AddOutcome {
        if let Some(pos) = self.devices.iter().position(|d| d.name == device.name) {
            let existing = &mut self.devices[pos];
            debug!(
                "Re-detected {} '{}' (index {} -> {})",
                self.kind, existing.name, existing.index, device.index
            );
            existing.card_index = device.card_index;
            existing.index = device.index;
            existing.description = device.description;
            existing.channels = device.channels;
            existing.base_volume = device.base_volume;
            existing.volume = device.volume;
            existing.volume_steps = device.volume_steps;
            self.rebuild_index();
            return AddOutcome::Updated;
        }

        device.is_current = false;
        device.is_default = false;

        let was_empty = self.devices.is_empty();
        if was_empty {
            device.is_current = true;
        }

        if default_name == Some(device.name.as_str()) {
            self.clear_flags(true);
            device.is_current = true;
            device.is_default = true;
            info!("Default {} found: {}", self.kind, device.name);
        } else if !was_empty
            && !self.devices.iter().any(|d| d.is_default)
            && policy.prefer(&device)
        {
            self.clear_flags(false);
            device.is_current = true;
            info!("Preferring {} {} as current", self.kind, device.name);
        }

        let became_current = device.is_current;
        self.by_index.insert(device.index, self.devices.len());
        self.devices.push(device);
        AddOutcome::Added { became_current }
    }

    /// Remove a device by index, selecting a replacement when it was current
    pub fn remove(&mut self, index: u32) -> Option<RemoveOutcome> {
        let pos = *self.by_index.get(&index)?;
        let removed = self.devices.remove(pos);
        self.rebuild_index();

        let replacement = if removed.is_current {
            self.select_replacement()
        } else {
            None
        };

        Some(RemoveOutcome {
            removed,
            replacement,
        })
    }

    /// Remove every device belonging to a card
    pub fn remove_card(&mut self, card_index: u32) -> Vec<RemoveOutcome> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.devices)
            .into_iter()
            .partition(|d| d.card_index == card_index);
        self.devices = kept;
        self.rebuild_index();

        // pick the replacement only after the whole card is gone
        let replacement = if removed.iter().any(|d| d.is_current) {
            self.select_replacement()
        } else {
            None
        };

        removed
            .into_iter()
            .map(|device| RemoveOutcome {
                replacement: if device.is_current { replacement } else { None },
                removed: device,
            })
            .collect()
    }

    /// Mark a device current, clearing the flag elsewhere
    pub fn set_current(&mut self, index: u32) -> bool {
        if !self.by_index.contains_key(&index) {
            return false;
        }
        for device in &mut self.devices {
            device.is_current = device.index == index;
        }
        true
    }

    /// Mark a device default (and current), returning its name
    pub fn set_default(&mut self, index: u32) -> Option<String> {
        if !self.by_index.contains_key(&index) {
            return None;
        }
        let mut name = None;
        for device in &mut self.devices {
            let selected = device.index == index;
            device.is_current = selected;
            device.is_default = selected;
            if selected {
                name = Some(device.name.clone());
            }
        }
        name
    }

    fn select_replacement(&mut self) -> Option<u32> {
        let pos = self
            .devices
            .iter()
            .position(|d| d.is_default)
            .or(if self.devices.is_empty() { None } else { Some(0) })?;
        let device = &mut self.devices[pos];
        device.is_current = true;
        info!("Current {} is now {}", self.kind, device.name);
        Some(device.index)
    }

    fn clear_flags(&mut self, including_default: bool) {
        for device in &mut self.devices {
            device.is_current = false;
            if including_default {
                device.is_default = false;
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.by_index = self
            .devices
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.index, pos))
            .collect();
    }
}
