//! Exercises the `config`-crate loading path the core crate deliberately
//! does not call itself (SPEC_FULL keeps `SchedulerConfig` serde-shaped so
//! any ecosystem loader composes with it, rather than hard-wiring a file
//! format into the library). This integration test stands in for that
//! caller: write a config file to a temp dir, load it through `config`,
//! deserialize into `SchedulerConfig`, and hand it to a live `Scheduler`.

use rtsched::{Scheduler, SchedulerConfig};
use std::io::Write;

#[test]
fn scheduler_config_loads_from_a_json_file_via_the_config_crate() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("rtsched.json");

    let mut file = std::fs::File::create(&path).expect("create config file");
    write!(
        file,
        r#"{{
            "initial_policy": "Edf",
            "preemption_mode": "Cooperative",
            "termination_grace": 0.5,
            "event_wait_timeout": 0.05,
            "tick_sleep": 0.001,
            "schedule_wait_timeout": 0.25,
            "default_mailbox_capacity": 64,
            "max_restarts": 3,
            "restart_backoff": 0.1,
            "max_restart_backoff": 10.0,
            "idle_shutdown_after": null
        }}"#
    )
    .expect("write config file");
    drop(file);

    let loaded = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .expect("build layered config")
        .try_deserialize::<SchedulerConfig>()
        .expect("deserialize into SchedulerConfig");

    assert_eq!(loaded.max_restarts, 3);
    assert_eq!(loaded.default_mailbox_capacity, Some(64));
    loaded.validate().expect("file-loaded config should validate");

    // And it is a perfectly ordinary SchedulerConfig from here on.
    let scheduler = Scheduler::new(loaded).expect("construct scheduler from loaded config");
    assert_eq!(scheduler.current_policy(), rtsched::SchedulingPolicy::Edf);
}
