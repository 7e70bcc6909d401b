//! Built-in demonstration cell and the flows that run against it.

use std::time::Duration;

use anyhow::{Context, Result};
use cellflow_engine::{ErrorHandling, MaterialCommand, Step};
use cellflow_sim::SimBackend;
use cellflow_types::MachineConfig;
use serde_json::{Value, json};
use tracing::info;

const DEMO_CELL: &str = r#"
name: demo cell
axes:
  - { name: x, travel_min: 0.0, travel_max: 400.0, max_velocity: 200.0, max_acceleration: 800.0 }
  - { name: z, travel_min: 0.0, travel_max: 150.0, max_velocity: 80.0, max_acceleration: 400.0 }
cylinders:
  - { name: gripper, transition_ms: 80 }
  - { name: clamp, transition_ms: 150, feedback: { extended: clamp.closed, retracted: clamp.open } }
sensors:
  - { name: probe, kind: analog }
  - { name: part_present, kind: digital }
workpiece_tables:
  - name: parts
    stations: [infeed, gripper, fixture, outfeed]
"#;

/// The machine used when no `--machine` file is given.
pub fn demo_machine() -> Result<MachineConfig> {
    MachineConfig::from_yaml_str(DEMO_CELL).context("built-in demo cell is malformed")
}

/// A named flow plus the backend setup it expects.
pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    prepare: fn(&SimBackend) -> Result<()>,
    flow: fn() -> Step,
}

impl Scenario {
    pub fn prepare(&self, backend: &SimBackend) -> Result<()> {
        (self.prepare)(backend).with_context(|| format!("preparing scenario '{}'", self.name))
    }

    pub fn flow(&self) -> Step {
        (self.flow)()
    }
}

pub static SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "pick-and-place",
        summary: "move a blank from the infeed into the fixture, clamp and machine it, then unload",
        prepare: no_setup,
        flow: pick_and_place,
    },
    Scenario {
        name: "probe",
        summary: "lower z until the probe touches the surface and record the height",
        prepare: couple_probe,
        flow: probe_surface,
    },
    Scenario {
        name: "clamp-all",
        summary: "position both axes while closing gripper and clamp in parallel",
        prepare: no_setup,
        flow: clamp_all,
    },
    Scenario {
        name: "jam",
        summary: "the clamp jams until maintenance frees it; the operator decides what happens",
        prepare: jam_clamp,
        flow: jammed_clamp,
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|scenario| scenario.name == name)
}

fn no_setup(_: &SimBackend) -> Result<()> {
    Ok(())
}

fn couple_probe(backend: &SimBackend) -> Result<()> {
    backend.bind_sensor_to_axis("probe", "z", |position| (position - 80.0).max(0.0) * 0.5)?;
    Ok(())
}

fn jam_clamp(backend: &SimBackend) -> Result<()> {
    let clamp = backend.cylinder("clamp").context("the cell has no 'clamp' cylinder")?.clone();
    clamp.set_jammed(true);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(900)).await;
        clamp.set_jammed(false);
        info!(cylinder = "clamp", "maintenance cleared the jam");
    });
    Ok(())
}

fn parts(command: MaterialCommand) -> Step {
    Step::material("parts", command)
}

fn pick_and_place() -> Step {
    let pick = Step::sequence([
        Step::move_to_and_wait("z", 0.0),
        Step::move_to_and_wait("x", 40.0),
        Step::move_to_and_wait("z", 120.0),
        Step::fire_and_wait("gripper", true).retry(2),
        parts(MaterialCommand::Attach {
            station: "infeed".into(),
            carrier: "gripper".into(),
        }),
        Step::move_to_and_wait("z", 0.0),
    ]);
    let place = Step::sequence([
        Step::move_to_and_wait("x", 300.0),
        Step::move_to_and_wait("z", 100.0),
        parts(MaterialCommand::Detach {
            carrier: "gripper".into(),
            station: "fixture".into(),
        }),
        Step::fire_and_wait("gripper", false),
        Step::move_to_and_wait("z", 0.0),
    ]);
    let machine = Step::sequence([
        Step::fire_and_wait("clamp", true).with_timeout(Duration::from_millis(500)),
        Step::dwell(Duration::from_millis(250)).named("spindle"),
        parts(MaterialCommand::Transform {
            station: "fixture".into(),
            class: "machined".into(),
        }),
        Step::fire_and_wait("clamp", false),
    ]);
    let unload = parts(MaterialCommand::CheckState {
        station: "fixture".into(),
        class: Some("machined".into()),
    })
    .bind(|machined| {
        if machined == json!(true) {
            parts(MaterialCommand::Attach {
                station: "fixture".into(),
                carrier: "gripper".into(),
            })
            .then(parts(MaterialCommand::Detach {
                carrier: "gripper".into(),
                station: "outfeed".into(),
            }))
        } else {
            Step::fail("fixture does not hold a machined part")
        }
    });

    Step::sequence([
        parts(MaterialCommand::Spawn {
            station: "infeed".into(),
            class: "blank".into(),
        }),
        Step::scope("pick", pick),
        Step::scope("place", place),
        Step::scope("machine", machine).on_error(ErrorHandling::AskUser),
        Step::scope("unload", unload),
    ])
}

fn probe_surface() -> Step {
    Step::move_to_and_wait("z", 0.0)
        .then(Step::move_until("z", 150.0, "probe", 10.0).named("touch off"))
        .bind(|height: Value| Step::set_variable("surface_z", height))
        .bind(|height: Value| Step::move_to_and_wait("z", 0.0).map(move |_| height.clone()))
}

fn clamp_all() -> Step {
    let position = Step::in_parallel([Step::move_to_and_wait("x", 200.0), Step::move_to_and_wait("z", 60.0)]);
    let close = Step::in_parallel([Step::fire_and_wait("gripper", true), Step::fire_and_wait("clamp", true)]);
    let open = Step::in_parallel([Step::fire_and_wait("gripper", false), Step::fire_and_wait("clamp", false)]);
    Step::in_parallel([Step::scope("position", position), Step::scope("close", close)])
        .then(Step::check_level("part_present", false))
        .then(Step::scope("open", open))
}

fn jammed_clamp() -> Step {
    let clamp = Step::fire_and_wait("clamp", true)
        .named("clamp part")
        .retry(1)
        .with_timeout(Duration::from_millis(400))
        .on_error(ErrorHandling::AskUser);
    Step::scope("clamp cycle", clamp)
        .on_error(ErrorHandling::Terminate)
        .then(Step::fire_and_wait("clamp", false))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cellflow_engine::{Cylinder, FailureKind, OperatorDecision, ScriptedOperator, run};

    use super::*;

    fn backend_for(scenario: &Scenario) -> SimBackend {
        let backend = SimBackend::new(demo_machine().unwrap());
        scenario.prepare(&backend).unwrap();
        backend
    }

    #[test]
    fn demo_cell_parses() {
        let machine = demo_machine().unwrap();
        assert_eq!(machine.axes.len(), 2);
        assert_eq!(machine.cylinder("clamp").unwrap().transition_ms, 150);
        assert_eq!(machine.workpiece_tables[0].stations.len(), 4);
    }

    #[test]
    fn scenario_names_are_unique() {
        for scenario in SCENARIOS {
            assert!(std::ptr::eq(find(scenario.name).unwrap(), scenario));
        }
        assert!(find("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pick_and_place_ends_at_the_outfeed() {
        let scenario = find("pick-and-place").unwrap();
        let backend = backend_for(scenario);
        let ctx = backend.context().build();

        let unloaded = run(&scenario.flow(), &ctx).await.unwrap();

        assert_eq!(unloaded["class"], json!("machined"));
        let table = backend.workpiece_table("parts").unwrap();
        let inventory = table.snapshot();
        assert_eq!(inventory.len(), 1);
        assert!(inventory.contains_key("outfeed"));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_records_the_surface_height() {
        let scenario = find("probe").unwrap();
        let backend = backend_for(scenario);
        let ctx = backend.context().build();

        let height = run(&scenario.flow(), &ctx).await.unwrap().as_f64().unwrap();

        assert!((height - 100.0).abs() < 1e-6, "touched at {height}");
        assert_eq!(ctx.variables().get_f64("surface_z"), Some(height));
        assert_eq!(backend.axis("z").unwrap().position(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn clamp_all_returns_everything_open() {
        let scenario = find("clamp-all").unwrap();
        let backend = backend_for(scenario);
        let ctx = backend.context().build();

        run(&scenario.flow(), &ctx).await.unwrap();

        assert!(backend.cylinders().all(|cylinder| !cylinder.state().is_extended));
        assert_eq!(backend.axis("x").unwrap().position(), 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn jam_recovers_when_the_operator_retries() {
        let scenario = find("jam").unwrap();
        let backend = backend_for(scenario);
        let operator = Arc::new(ScriptedOperator::always(OperatorDecision::Retry));
        let ctx = backend.context().operator(operator.clone()).build();

        run(&scenario.flow(), &ctx).await.unwrap();

        assert!(!operator.received().is_empty());
        assert!(operator.received().iter().all(|escalation| escalation.node == "clamp part"));
    }

    #[tokio::test(start_paused = true)]
    async fn jam_aborts_the_run_when_declined() {
        let scenario = find("jam").unwrap();
        let backend = backend_for(scenario);
        let ctx = backend.context().build();

        let failure = run(&scenario.flow(), &ctx).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::UserAborted);
        assert!(failure.terminal);
    }
}
