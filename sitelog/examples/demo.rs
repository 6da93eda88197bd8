//! Minimal tour: macro logging, a policy override, async dispatch.
//!
//! ```sh
//! cargo run --example demo
//! ```

use sitelog::config::policy;
use sitelog::dispatcher::{DeferredEmitter, Dispatcher};
use sitelog::emitters;
use sitelog::flush::Flush;
use sitelog::{global, sitelog, Level, LevelSet, SiteRef};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    // the default policy already routes everything to stdout
    sitelog!(Level::Info, "starting up, pid=", std::process::id());

    // route "audit"-tagged sites to stderr with a timestamp, warnings up
    let audit_emitter: &'static _ =
        Box::leak(Box::new(emitters::HandleEmitter::from_raw(2).stamped()));
    let audit = policy(
        Some(audit_emitter),
        LevelSet::up_to(Level::Warning),
        |site: SiteRef| site.tag() == "audit",
    );
    global::insert_policy(10, audit).unwrap();

    sitelog!(tag: "audit", Level::Warning, "quota at ", 93_u32, "%");
    sitelog!(tag: "audit", Level::Verbose, "this one is gated off");

    // defer stdout emission through a dispatcher
    let dispatcher = Arc::new(Dispatcher::new(Duration::from_millis(1), 128, 1, 1));
    dispatcher.run();
    let deferred: &'static _ = Box::leak(Box::new(DeferredEmitter::new(
        dispatcher.clone(),
        emitters::stdout(),
    )));
    global::set_default_emitter(Some(deferred));

    for index in 0..5_u32 {
        sitelog!(Level::Info, "async message #", index);
    }

    let flush = Flush::new();
    dispatcher.enqueue_flush(&flush);
    flush.wait(Duration::from_secs(1));
    sitelog!(tag: "audit", Level::Info, "done");
}
