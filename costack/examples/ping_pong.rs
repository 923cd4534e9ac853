use std::cell::RefCell;
use std::rc::Rc;

use costack::Engine;

struct DropMarker(&'static str);

impl Drop for DropMarker {
    fn drop(&mut self) {
        println!("{} dropped", self.0);
    }
}

fn main() {
    costack::kprint::init();
    let engine = Engine::new().unwrap();
    let rally = Rc::new(RefCell::new(Vec::new()));

    let out = rally.clone();
    engine
        .start(move |engine| {
            for name in ["ping", "pong"] {
                let out = out.clone();
                engine
                    .spawn(move |engine| {
                        let _marker = DropMarker(name);
                        let me = engine.current().unwrap();
                        for hit in 0..3 {
                            out.borrow_mut().push(format!("{} {}", name, hit));
                            engine.ready(me).unwrap();
                            engine.yield_now();
                        }
                    })
                    .unwrap();
            }
        })
        .unwrap();

    for hit in rally.borrow().iter() {
        println!("{}", hit);
    }
    assert_eq!(rally.borrow().len(), 6);
}
