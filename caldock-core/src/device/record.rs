//! Device record envelope types.
//!
//! A `DeviceRecord` is what the transport driver moves in and out of the
//! handheld: a numeric record ID, an opaque payload, and the per-record
//! bits the device database keeps alongside it.

/// Maximum number of categories the device database supports.
pub const MAX_CATEGORIES: usize = 16;

/// A device-native record.
///
/// `id == 0` means the device has not assigned an ID yet; the device does so
/// on the next add and reports it back through `set_device_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: u32,
    /// Encoded datebook payload; opaque to the transport layer.
    pub payload: Vec<u8>,
    /// Index into the device category table.
    pub category: u8,
    pub attr: RecordStatus,
    pub archived: bool,
    pub secret: bool,
}

/// Per-record status attribute as the device database tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordStatus {
    #[default]
    None,
    New,
    Modified,
    Deleted,
}

/// The device's flat category table.
///
/// Index 0 is the catch-all category; unknown names map to it.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    names: Vec<String>,
}

impl CategoryTable {
    pub fn new(names: Vec<String>) -> Self {
        let mut names = names;
        names.truncate(MAX_CATEGORIES);
        if names.is_empty() {
            names.push("Unfiled".to_string());
        }
        CategoryTable { names }
    }

    /// Index for a category name; 0 when absent or unknown.
    pub fn index_of(&self, name: Option<&str>) -> u8 {
        let Some(name) = name else { return 0 };
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u8)
            .unwrap_or(0)
    }

    /// Name for a category index. Index 0 and out-of-range indices yield
    /// `None`; the catch-all category does not round-trip as a CATEGORIES
    /// value.
    pub fn name_of(&self, index: u8) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.names.get(index as usize).map(String::as_str)
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        CategoryTable::new(vec!["Unfiled".to_string()])
    }
}
