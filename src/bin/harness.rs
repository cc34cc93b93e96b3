//! Manual exercising harness for the scheduler core.
//!
//! Not part of the crate's public contract — `run` itself stops whenever the
//! visitor bails or nothing eligible remains (see `scheduler::Scheduler::run`).
//! This binary exists so the scheduler can be driven from the command line
//! against one of a few built-in demo trees, with a `RunBudget` tick ceiling
//! so a visitor that always reports "still active" can't spin forever.

use clap::{App, Arg};
use log::info;

use priosched::scheduler::{Feedback, NodeId, Parent, RunBudget, Scheduler};

fn build_equal_weight_siblings(sched: &mut Scheduler) -> Vec<(NodeId, &'static str)> {
    let mut nodes = Vec::new();
    for name in ["A", "B", "C"] {
        let id = sched.open(Parent::Root, 12, false);
        sched.set_active(id);
        nodes.push((id, name));
    }
    nodes
}

fn build_weight_classes(sched: &mut Scheduler) -> Vec<(NodeId, &'static str)> {
    let a = sched.open(Parent::Root, 32, false);
    let b = sched.open(Parent::Root, 32, false);
    let c = sched.open(Parent::Root, 12, false);
    for id in [a, b, c] {
        sched.set_active(id);
    }
    vec![(a, "A"), (b, "B"), (c, "C")]
}

fn build_firefox_style(sched: &mut Scheduler) -> Vec<(NodeId, &'static str)> {
    let g1 = sched.open(Parent::Root, 201, false);
    let g2 = sched.open(Parent::Root, 101, false);
    let g3 = sched.open(Parent::Root, 1, false);
    let g4 = sched.open(Parent::Node(g3), 1, false);
    let g5 = sched.open(Parent::Node(g1), 1, false);
    let r1 = sched.open(Parent::Node(g5), 22, false);
    let r2 = sched.open(Parent::Node(g1), 22, false);
    let r3 = sched.open(Parent::Node(g1), 22, false);
    for id in [r1, r2, r3] {
        sched.set_active(id);
    }
    vec![
        (g1, "g1"),
        (g2, "g2"),
        (g3, "g3"),
        (g4, "g4"),
        (g5, "g5"),
        (r1, "r1"),
        (r2, "r2"),
        (r3, "r3"),
    ]
}

fn main() {
    env_logger::init();

    let matches = App::new("priosched-harness")
        .about("drives the scheduler core against a built-in demo tree and prints the visit order")
        .arg(
            Arg::with_name("scenario")
                .long("scenario")
                .takes_value(true)
                .possible_values(&["equal-weight", "weight-classes", "firefox"])
                .default_value("equal-weight"),
        )
        .arg(
            Arg::with_name("budget")
                .long("budget")
                .takes_value(true)
                .default_value("10"),
        )
        .get_matches();

    let budget: usize = matches
        .value_of("budget")
        .unwrap()
        .parse()
        .expect("--budget must be a non-negative integer");

    let mut sched = Scheduler::new();
    let nodes = match matches.value_of("scenario").unwrap() {
        "equal-weight" => build_equal_weight_siblings(&mut sched),
        "weight-classes" => build_weight_classes(&mut sched),
        "firefox" => build_firefox_style(&mut sched),
        other => unreachable!("clap validated possible_values, got {}", other),
    };

    info!("running {} ticks", budget);
    let mut visited = Vec::new();
    sched.run(RunBudget(budget), |id| {
        let label = nodes.iter().find(|(n, _)| *n == id).map(|(_, l)| *l).unwrap();
        visited.push(label);
        Feedback::KeepActive
    });

    println!("{}", visited.join(","));
}
