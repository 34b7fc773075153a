//! Heap reporting for the device console

use esp_idf_sys::*;
use log::*;

/// Print a compact one-line memory summary
pub fn print_memory_summary(label: &str) {
    unsafe {
        let free = esp_get_free_heap_size();
        let min_free = heap_caps_get_minimum_free_size(MALLOC_CAP_DEFAULT);
        let largest = heap_caps_get_largest_free_block(MALLOC_CAP_DEFAULT);

        info!(
            "[MEM] {}: Free={}KB, Min={}KB, Largest={}KB",
            label,
            free / 1024,
            min_free / 1024,
            largest / 1024
        );

        if min_free < 20 * 1024 {
            warn!("[MEM] low heap watermark, {} KB", min_free / 1024);
        }
    }
}
