//! Renders the inspectable execution artifact of a compiled computation.
//!
//! The text lists one `alloc_<name>` and `update_<name>` entry per buffer, one
//! `compute_<kind>_<id>` entry per step, and the `allocate`, `init` and
//! `compute` aggregates. It is derived from the plan only, so identical graphs
//! render identical text.

use crate::{
    computation::ComputeStep,
    graph::{GraphNode, NodeId},
    planner::{AllocationPlan, BufferKind, TensorView},
    DType,
};

fn describe(view: &TensorView, plan: &AllocationPlan) -> String {
    format!(
        "{}[{}] {} strides {:?} +{}",
        plan.buffers[view.buffer].name,
        view.buffer,
        view.desc.shape,
        view.desc.strides,
        view.desc.byte_offset
    )
}

fn node_name<T: DType>(nodes: &[GraphNode<T>], id: NodeId) -> String {
    nodes
        .get(id.get())
        .map(|n| n.name())
        .unwrap_or_else(|| id.to_string())
}

pub(crate) fn render<T: DType>(
    plan: &AllocationPlan,
    steps: &[ComputeStep<T>],
    nodes: &[GraphNode<T>],
) -> String {
    let mut src = String::new();
    src.push_str(&format!(
        "# {} buffers, {} bytes, {} steps\n\n",
        plan.buffers.len(),
        plan.total_bytes(),
        steps.len()
    ));

    for (i, buffer) in plan.buffers.iter().enumerate() {
        src.push_str(&format!(
            "def alloc_{}():\n    buffer[{i}] = alloc({:?}, {}, {})\n\n",
            buffer.name, buffer.kind, buffer.dtype, buffer.size_bytes
        ));
        src.push_str(&format!(
            "def update_{}(storage):\n    buffer[{i}] = storage\n\n",
            buffer.name
        ));
    }

    for step in steps {
        let inputs = step
            .inputs
            .iter()
            .map(|v| describe(v, plan))
            .collect::<Vec<_>>();
        src.push_str(&format!(
            "def {}():\n    {} <- {}({})\n\n",
            step.name,
            describe(&step.output, plan),
            step.op.kind(),
            inputs.join(", ")
        ));
    }

    src.push_str("def allocate():\n");
    for buffer in &plan.buffers {
        src.push_str(&format!("    alloc_{}()\n", buffer.name));
    }

    src.push_str("\ndef init():\n");
    let mut any_init = false;
    for buffer in plan.buffers.iter().filter(|b| b.kind.requires_init()) {
        let what = match buffer.kind {
            BufferKind::Constant => "copy_literal",
            _ => "run_initializer",
        };
        src.push_str(&format!("    {what}(buffer[{}])\n", buffer.name));
        any_init = true;
    }
    if !any_init {
        src.push_str("    pass\n");
    }

    let params = plan
        .parameters
        .iter()
        .map(|id| node_name(nodes, *id))
        .collect::<Vec<_>>();
    src.push_str(&format!("\ndef compute({}):\n", params.join(", ")));
    for id in &plan.parameters {
        if let Ok(view) = plan.view(*id) {
            src.push_str(&format!(
                "    {} <- {}\n",
                describe(view, plan),
                node_name(nodes, *id)
            ));
        }
    }
    for step in steps {
        src.push_str(&format!("    {}()\n", step.name));
    }
    let outputs = plan
        .outputs
        .iter()
        .filter_map(|id| plan.view(*id).ok())
        .map(|v| describe(v, plan))
        .collect::<Vec<_>>();
    src.push_str(&format!("    return ({})\n", outputs.join(", ")));
    src
}
