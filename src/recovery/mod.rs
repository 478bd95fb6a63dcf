pub mod scanner;

pub use scanner::{extract_recoverable, scan, scan_file, ScanQuality, ScanReport, ScannedSlot, SlotHealth};
