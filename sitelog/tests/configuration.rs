//! End-to-end configuration scenarios against the process-global manager
//!
//! These tests share global state (the configuration, the default
//! policy) and must run serially.

use serial_test::serial;
use sitelog::config::{policy, Policy};
use sitelog::emitters::noop;
use sitelog::test_utils::{leak_site, CountingEmitter};
use sitelog::{global, sitelog, Level, LevelSet, SiteRef};
use std::sync::Arc;

fn counting() -> &'static CountingEmitter {
    Box::leak(Box::new(CountingEmitter::new()))
}

/// Reset the default policy between scenarios.
fn quiesce_defaults() {
    global::set_default_emitter(Some(noop()));
    global::set_default_levels(LevelSet::all());
}

#[test]
#[serial]
fn default_policy_receives_all_sites() {
    let sink = counting();
    global::set_default_emitter(Some(sink));
    global::set_default_levels(LevelSet::only(Level::Info));

    let site = leak_site("e1:1", "configuration", "untagged");
    assert!(global::register_site(site));
    site.log(Level::Info, |message| message.format(("payload",)));

    assert_eq!(sink.count(), 1);
    quiesce_defaults();
}

#[test]
#[serial]
fn higher_priority_policy_overrides_default() {
    let fallback = counting();
    let override_sink = counting();
    global::set_default_emitter(Some(fallback));
    global::set_default_levels(LevelSet::only(Level::Info));

    let tagged: Arc<dyn Policy> = policy(
        Some(override_sink),
        LevelSet::only(Level::Info),
        |site: SiteRef| site.tag() == "T",
    );
    global::insert_policy(0, tagged.clone()).unwrap();

    let site = leak_site("e2:1", "configuration", "T");
    assert!(global::register_site(site));
    site.log(Level::Info, |message| message.format(("payload",)));

    assert_eq!(override_sink.count(), 1);
    assert_eq!(fallback.count(), 0);

    global::remove_policy(0, &tagged).unwrap();
    quiesce_defaults();
}

#[test]
#[serial]
fn removing_the_override_demotes_to_default() {
    let fallback = counting();
    let override_sink = counting();
    global::set_default_emitter(Some(fallback));
    global::set_default_levels(LevelSet::only(Level::Info));

    let tagged: Arc<dyn Policy> = policy(
        Some(override_sink),
        LevelSet::only(Level::Info),
        |site: SiteRef| site.tag() == "T",
    );
    global::insert_policy(0, tagged.clone()).unwrap();

    let site = leak_site("e3:1", "configuration", "T");
    assert!(global::register_site(site));
    global::remove_policy(0, &tagged).unwrap();

    site.log(Level::Info, |message| message.format(("payload",)));
    assert_eq!(fallback.count(), 1);
    assert_eq!(override_sink.count(), 0);
    quiesce_defaults();
}

#[test]
#[serial]
fn level_gating_skips_the_builder() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let sink = counting();
    global::set_default_emitter(Some(sink));
    global::set_default_levels(LevelSet::only(Level::Error));

    let site = leak_site("e4:1", "configuration", "untagged");
    assert!(global::register_site(site));

    static BUILDS: AtomicUsize = AtomicUsize::new(0);
    site.log(Level::Info, |message| {
        BUILDS.fetch_add(1, Ordering::SeqCst);
        message.format(("never",));
    });

    assert_eq!(sink.count(), 0);
    assert_eq!(BUILDS.load(Ordering::SeqCst), 0);
    quiesce_defaults();
}

#[test]
#[serial]
fn macro_sites_register_on_first_emission() {
    let sink = counting();
    global::set_default_emitter(Some(sink));
    global::set_default_levels(LevelSet::all());

    // first pass bootstraps and re-dispatches; second hits the sink
    // through the configured pointer directly
    sitelog!(tag: "bootstrap-test", Level::Info, "first ", 1);
    sitelog!(tag: "bootstrap-test", Level::Info, "second ", 2);
    assert_eq!(sink.count(), 2);

    let mut bootstrapped = 0;
    global::visit_all_sites(|site| {
        if site.tag() == "bootstrap-test" {
            bootstrapped += 1;
        }
    });
    assert_eq!(bootstrapped, 1);
    quiesce_defaults();
}

#[test]
#[serial]
fn every_registered_site_has_exactly_one_owner() {
    global::set_default_emitter(Some(noop()));

    let high: Arc<dyn Policy> = policy(Some(noop()), LevelSet::all(), |site: SiteRef| {
        site.tag() == "owned"
    });
    global::insert_policy(3, high.clone()).unwrap();

    let sites = [
        leak_site("own:1", "configuration", "owned"),
        leak_site("own:2", "configuration", "other"),
    ];
    for site in sites {
        assert!(global::register_site(site));
    }

    for site in sites {
        let mut owners = 0;
        global::visit_all_sites(|seen| {
            if seen == SiteRef(site) {
                owners += 1;
            }
        });
        assert_eq!(owners, 1, "site {} has {} owners", site.location(), owners);
    }

    assert_eq!(
        global::configuration().managing_priority(SiteRef(sites[0])),
        Some(3)
    );
    assert_eq!(
        global::configuration().managing_priority(SiteRef(sites[1])),
        Some(global::DEFAULT_PRIORITY)
    );

    global::remove_policy(3, &high).unwrap();
    // demotion hands the tagged site back to the default policy
    assert_eq!(
        global::configuration().managing_priority(SiteRef(sites[0])),
        Some(global::DEFAULT_PRIORITY)
    );
    quiesce_defaults();
}

#[test]
#[serial]
fn reconfigured_levels_propagate_on_update() {
    let sink = counting();
    global::set_default_emitter(Some(sink));
    global::set_default_levels(LevelSet::all());

    let site = leak_site("prop:1", "configuration", "untagged");
    assert!(global::register_site(site));
    assert!(site.enabled(Level::Verbose));

    global::set_default_levels(LevelSet::only(Level::Critical));
    assert!(!site.enabled(Level::Verbose));
    assert!(site.enabled(Level::Critical));

    site.log(Level::Verbose, |message| message.format(("gated",)));
    assert_eq!(sink.count(), 0);
    site.log(Level::Critical, |message| message.format(("passes",)));
    assert_eq!(sink.count(), 1);
    quiesce_defaults();
}
