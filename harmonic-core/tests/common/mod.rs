#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use harmonic_core::clock::ManualClock;
use harmonic_core::engine::{ScriptedEngine, ScriptedHandle};
use harmonic_core::{CoreConfig, Listener, TunerContext, listener};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A context driven by a manual clock with a scripted engine of
/// `regions` regions attached.
pub fn attached(regions: usize) -> (TunerContext, ScriptedHandle, Rc<ManualClock>) {
    let (mut ctx, clock) = detached();
    let (engine, handle) = ScriptedEngine::new(regions);
    ctx.attach_engine(Box::new(engine));
    (ctx, handle, clock)
}

pub fn detached() -> (TunerContext, Rc<ManualClock>) {
    init_logging();
    let clock = Rc::new(ManualClock::new());
    let ctx = TunerContext::with_clock(CoreConfig::default(), clock.clone());
    (ctx, clock)
}

/// A listener that appends what `extract` returns for each event.
pub fn recorder<E: 'static, T: 'static>(
    sink: &Rc<RefCell<Vec<T>>>,
    extract: impl Fn(&E) -> T + 'static,
) -> Listener<E> {
    let sink = Rc::clone(sink);
    listener(move |event: &E| {
        sink.borrow_mut().push(extract(event));
        Ok(())
    })
}

/// Runs `frames` ticks of a constant-magnitude frame.
pub fn ticks(ctx: &mut TunerContext, magnitude: f32, frames: usize) {
    for _ in 0..frames {
        ctx.process_audio(&[magnitude, -magnitude]).unwrap();
    }
}
