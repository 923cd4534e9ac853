mod guard;
mod image;

pub use guard::GuardStack;
pub use image::StackImage;

/// Returns page size in bytes
pub fn page_size() -> usize {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static PAGE_SIZE_CACHE: AtomicUsize = AtomicUsize::new(0);
    match PAGE_SIZE_CACHE.load(Ordering::Relaxed) {
        0 => {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE_CACHE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}
