//! Kahn-style layering of a plan's dependency graph.

use crate::error::{Error, Result};
use crate::plan::{OperationId, Plan};

/// Groups operations into layers. Every operation's dependencies sit in
/// earlier layers; operations inside one layer are independent.
pub fn compute_layers(plan: &Plan) -> Result<Vec<Vec<OperationId>>> {
    let count = plan.operations.len();

    for (index, op) in plan.operations.iter().enumerate() {
        if op.id.0 != index {
            return Err(Error::pipeline_invariant(
                format!("operation at position {} carries id {}", index, op.id),
                vec![op.label()],
            ));
        }
    }

    let mut indegree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (index, op) in plan.operations.iter().enumerate() {
        for dep in &op.depends_on {
            if dep.0 >= count {
                return Err(Error::pipeline_invariant(
                    format!("{} depends on unknown operation {}", op.label(), dep),
                    vec![op.label()],
                ));
            }
            indegree[index] += 1;
            dependents[dep.0].push(index);
        }
    }

    let mut frontier: Vec<usize> = (0..count).filter(|i| indegree[*i] == 0).collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !frontier.is_empty() {
        placed += frontier.len();
        let mut next = Vec::new();
        for &index in &frontier {
            for &child in &dependents[index] {
                indegree[child] -= 1;
                if indegree[child] == 0 {
                    next.push(child);
                }
            }
        }
        next.sort_unstable();
        layers.push(frontier.into_iter().map(OperationId).collect());
        frontier = next;
    }

    if placed != count {
        let pending = plan
            .operations
            .iter()
            .enumerate()
            .filter(|(index, _)| indegree[*index] > 0)
            .map(|(_, op)| op.label())
            .collect();
        return Err(Error::pipeline_cycle(pending));
    }

    Ok(layers)
}
