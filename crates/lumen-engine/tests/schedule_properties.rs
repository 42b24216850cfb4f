//! Ordering and pool properties over randomly generated graphs.

use std::collections::HashMap;

use lumen_engine::compositor::headless::{DrawRecord, HeadlessBackend};
use lumen_engine::compositor::{Compositor, Node, OutputDesc, TextureParams};
use lumen_engine::coords::Viewport;
use proptest::prelude::*;

/// Node `i` may read from any node `j < i`; `feedback[i]` adds a
/// keep-last-frame self link.
#[derive(Debug, Clone)]
struct Dag {
    inputs: Vec<Vec<usize>>,
    feedback: Vec<bool>,
    insertion: Vec<usize>,
}

fn dag() -> impl Strategy<Value = Dag> {
    (1usize..10)
        .prop_flat_map(|n| {
            let inputs = (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(Vec::new()).boxed()
                    } else {
                        proptest::collection::btree_set(0..i, 0..=i.min(3))
                            .prop_map(|s| s.into_iter().collect::<Vec<_>>())
                            .boxed()
                    }
                })
                .collect::<Vec<_>>();
            let feedback = proptest::collection::vec(any::<bool>(), n);
            let insertion = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (inputs, feedback, insertion)
        })
        .prop_map(|(inputs, feedback, insertion)| Dag { inputs, feedback, insertion })
}

fn name(i: usize) -> String {
    format!("n{i}")
}

fn build(dag: &Dag, with_feedback: bool) -> Compositor<HeadlessBackend> {
    let mut c = Compositor::default();
    for &i in &dag.insertion {
        let mut out = OutputDesc::new(TextureParams::viewport());
        let mut node = Node::filter(name(i), "");
        for &j in &dag.inputs[i] {
            node = node.with_input(format!("in{j}"), name(j).as_str());
        }
        if with_feedback && dag.feedback[i] {
            node = node.with_input("self", format!("{}.out", name(i)).as_str());
            out = out.keep_last_frame();
        }
        c.add_node(node.with_output("out", out)).unwrap();
    }
    c
}

fn by_label(draws: &[DrawRecord]) -> HashMap<&str, &DrawRecord> {
    draws.iter().map(|d| (d.label.as_str(), d)).collect()
}

proptest! {
    #[test]
    fn every_node_runs_once_after_its_producers(dag in dag()) {
        let mut b = HeadlessBackend::new(Viewport::new(64.0, 32.0, 1.0));
        let mut c = build(&dag, false);

        let stats = c.render(&mut b).unwrap();
        let n = dag.inputs.len();
        prop_assert_eq!(stats.nodes_executed, n);
        prop_assert_eq!(stats.order.len(), n);

        let position: HashMap<&str, usize> =
            stats.order.iter().enumerate().map(|(p, s)| (s.as_str(), p)).collect();
        for (i, inputs) in dag.inputs.iter().enumerate() {
            for &j in inputs {
                prop_assert!(position[name(j).as_str()] < position[name(i).as_str()]);
            }
        }

        let draws = b.take_draws();
        prop_assert_eq!(draws.len(), n);
        let draws = by_label(&draws);
        prop_assert_eq!(draws.len(), n, "a node was drawn twice");

        // Each consumer sampled exactly what its producer wrote this frame.
        for (i, inputs) in dag.inputs.iter().enumerate() {
            let consumer = draws[name(i).as_str()];
            for &j in inputs {
                let written = draws[name(j).as_str()].output("out");
                prop_assert_eq!(consumer.input(&format!("in{j}")), written);
            }
        }
    }

    #[test]
    fn transient_textures_return_to_the_pool(dag in dag()) {
        let mut b = HeadlessBackend::new(Viewport::new(64.0, 32.0, 1.0));
        let mut c = build(&dag, false);

        let first = c.render(&mut b).unwrap();
        prop_assert_eq!(c.pool().live_count(), 0);
        prop_assert!(first.peak_live <= dag.inputs.len());

        let second = c.render(&mut b).unwrap();
        prop_assert_eq!(second.textures_allocated, 0);
        prop_assert_eq!(c.pool().live_count(), 0);
        prop_assert_eq!(b.live_textures(), c.pool().allocated_count());
    }

    #[test]
    fn insertion_order_does_not_change_dependencies(dag in dag()) {
        let mut sorted = dag.clone();
        sorted.insertion.sort_unstable();

        let mut shuffled = build(&dag, false);
        let mut ordered = build(&sorted, false);
        // Sorted insertion is already topological, so it is kept verbatim.
        let expected: Vec<String> = (0..dag.inputs.len()).map(name).collect();
        prop_assert_eq!(ordered.execution_order().unwrap(), expected);
        prop_assert_eq!(shuffled.execution_order().unwrap().len(), dag.inputs.len());
    }

    #[test]
    fn feedback_reads_previous_frame_and_holds_one_texture(dag in dag()) {
        let mut b = HeadlessBackend::new(Viewport::new(16.0, 16.0, 1.0));
        let mut c = build(&dag, true);
        let loops: Vec<usize> = (0..dag.inputs.len()).filter(|&i| dag.feedback[i]).collect();

        c.render(&mut b).unwrap();
        let frame1 = b.take_draws();
        prop_assert_eq!(c.pool().live_count(), loops.len());

        c.render(&mut b).unwrap();
        let frame2 = b.take_draws();
        prop_assert_eq!(c.pool().live_count(), loops.len());

        let (frame1, frame2) = (by_label(&frame1), by_label(&frame2));
        for &i in &loops {
            let label = name(i);
            prop_assert_eq!(frame1[label.as_str()].input("self"), Some(0));
            prop_assert_eq!(frame2[label.as_str()].input("self"), frame1[label.as_str()].output("out"));
        }
    }
}
