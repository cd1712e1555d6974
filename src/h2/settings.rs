//! HTTP/2 SETTINGS (RFC 7540 §6.5): the subset of parameters this engine
//! negotiates.

use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub(crate) const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub(crate) const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub(crate) const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub(crate) const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub(crate) const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// The peer's last-declared settings (§3 data model: drives the
/// connection's allocation cap and header-table sizing). Each field is
/// independently atomic since SETTINGS application and stream allocation
/// race each other across tasks.
pub(crate) struct PeerSettings {
    pub(crate) header_table_size: AtomicU32,
    pub(crate) max_concurrent_streams: AtomicU32,
    pub(crate) initial_window_size: AtomicU32,
    pub(crate) max_frame_size: AtomicU32,
    pub(crate) max_header_list_size: AtomicU32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        PeerSettings {
            header_table_size: AtomicU32::new(4096),
            max_concurrent_streams: AtomicU32::new(u32::MAX),
            initial_window_size: AtomicU32::new(65_535),
            max_frame_size: AtomicU32::new(16_384),
            max_header_list_size: AtomicU32::new(u32::MAX),
        }
    }
}

impl PeerSettings {
    pub(crate) fn apply(&self, id: u16, value: u32) {
        match id {
            SETTINGS_HEADER_TABLE_SIZE => self.header_table_size.store(value, Ordering::SeqCst),
            SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams.store(value, Ordering::SeqCst),
            SETTINGS_INITIAL_WINDOW_SIZE => self.initial_window_size.store(value, Ordering::SeqCst),
            SETTINGS_MAX_FRAME_SIZE => self.max_frame_size.store(value.clamp(16_384, 16_777_215), Ordering::SeqCst),
            SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size.store(value, Ordering::SeqCst),
            SETTINGS_ENABLE_PUSH | _ => {}
        }
    }
}

/// The settings this engine advertises to the peer, derived from
/// [`crate::config::Http2Config`].
pub(crate) fn our_settings(cfg: &crate::config::Http2Config) -> Vec<(u16, u32)> {
    vec![
        (SETTINGS_ENABLE_PUSH, 0),
        (SETTINGS_INITIAL_WINDOW_SIZE, cfg.initial_window_size),
        (SETTINGS_MAX_FRAME_SIZE, cfg.max_frame_size),
        (SETTINGS_MAX_HEADER_LIST_SIZE, cfg.max_header_list_size),
    ]
}
