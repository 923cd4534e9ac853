use std::io::Error;

use costack::stack::{page_size, GuardStack, StackImage};
use costack::{Engine, EngineConfig};

#[test]
fn create_guard_stack() -> Result<(), Error> {
    let guard = GuardStack::new(64 * 1024)?;
    assert_eq!(guard.size(), 64 * 1024);
    assert_eq!(guard.bottom() as usize - guard.top() as usize, guard.size());
    Ok(())
}

#[test]
fn guard_stack_is_rounded_to_pages() -> Result<(), Error> {
    let page = page_size();
    assert_eq!(GuardStack::new(1)?.size(), page);
    assert_eq!(GuardStack::new(page + 1)?.size(), 2 * page);
    assert_eq!(GuardStack::new(0)?.size(), page);

    let guard = GuardStack::new(3 * page)?;
    assert_eq!(guard.bottom() as usize % page, 0);
    Ok(())
}

#[test]
fn guard_stack_overlap() -> Result<(), Error> {
    let guard = GuardStack::new(page_size())?;
    let top = guard.top() as *const u8;
    assert!(guard.overlaps(top, 1));
    assert!(guard.overlaps(unsafe { top.sub(8) }, 16));
    assert!(!guard.overlaps(unsafe { top.sub(8) }, 8));
    assert!(!guard.overlaps(guard.bottom(), 64));

    let local = [0u8; 32];
    assert!(!guard.overlaps(local.as_ptr(), local.len()));
    Ok(())
}

#[test]
fn guard_stack_is_writable() -> Result<(), Error> {
    let guard = GuardStack::new(page_size())?;
    unsafe {
        let last = guard.bottom().sub(1);
        *last = 0xAB;
        *guard.top() = 0xCD;
        assert_eq!(*last, 0xAB);
        assert_eq!(*guard.top(), 0xCD);
    }
    Ok(())
}

#[test]
fn image_is_an_exact_copy() {
    let source: Vec<u8> = (0..=255).collect();
    let image = unsafe { StackImage::capture(source.as_ptr(), source.len()) };
    assert_eq!(image.len(), 256);
    assert!(!image.is_empty());
    let copied = unsafe { std::slice::from_raw_parts(image.as_ptr(), image.len()) };
    assert_eq!(copied, &source[..]);
}

#[test]
fn engine_with_a_small_guard() -> Result<(), Error> {
    let page = page_size();
    let engine = Engine::with_config(EngineConfig {
        guard_size: 3 * page + 1,
    })?;
    engine
        .start(|engine| {
            engine
                .spawn(|engine| {
                    let me = engine.current().unwrap();
                    engine.ready(me).unwrap();
                    engine.yield_now();
                })
                .unwrap();
            let me = engine.current().unwrap();
            engine.ready(me).unwrap();
            engine.yield_now();
        })
        .unwrap();
    assert_eq!(engine.into_guard().size(), 4 * page);
    Ok(())
}

#[test]
fn create_1000_guard_stacks() {
    let mut stacks = vec![];
    for _i in 0..1000 {
        let stack = GuardStack::new(64 * 1024);
        assert!(stack.is_ok());
        stacks.push(stack);
    }
}
