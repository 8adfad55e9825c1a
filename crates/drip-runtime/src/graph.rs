//! Whole-automation graph validation and navigation.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::{AutomationId, StepId};
use crate::model::{AutomationStep, Branch, StepType};

/// The steps of one automation as a directed tree rooted at its trigger.
///
/// Edges run parent to child and carry the child's branch label.
#[derive(Debug, Clone)]
pub struct AutomationGraph {
    graph: DiGraph<AutomationStep, Option<Branch>>,
    node_indices: HashMap<StepId, NodeIndex>,
    trigger: NodeIndex,
}

impl AutomationGraph {
    /// Builds and validates the graph.
    ///
    /// Checks that:
    /// - every step belongs to the same automation
    /// - there is exactly one trigger and it has no parent
    /// - every other step has a parent within the automation
    /// - `IF/ELSE` children carry distinct `YES`/`NO` labels
    /// - other steps have at most one unlabeled child, `END` has none
    /// - the graph is acyclic
    pub fn build(steps: impl IntoIterator<Item = AutomationStep>) -> RuntimeResult<Self> {
        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        let mut automation_id: Option<AutomationId> = None;

        for step in steps {
            match automation_id {
                None => automation_id = Some(step.automation_id),
                Some(id) if id != step.automation_id => {
                    return Err(RuntimeError::invalid_graph(format!(
                        "step {} belongs to automation {}, expected {id}",
                        step.id, step.automation_id
                    )));
                }
                Some(_) => {}
            }

            let id = step.id;
            let index = graph.add_node(step);
            if node_indices.insert(id, index).is_some() {
                return Err(RuntimeError::invalid_graph(format!("duplicate step {id}")));
            }
        }

        let mut triggers = graph
            .node_indices()
            .filter(|index| graph[*index].step_type == StepType::Trigger);
        let trigger = triggers
            .next()
            .ok_or_else(|| RuntimeError::invalid_graph("automation has no trigger step"))?;
        if triggers.next().is_some() {
            return Err(RuntimeError::invalid_graph(
                "automation has more than one trigger step",
            ));
        }

        let mut edges = Vec::new();
        for index in graph.node_indices() {
            let step = &graph[index];
            match (step.step_type, step.parent_id) {
                (StepType::Trigger, None) => {}
                (StepType::Trigger, Some(_)) => {
                    return Err(RuntimeError::invalid_graph(format!(
                        "trigger step {} must not have a parent",
                        step.id
                    )));
                }
                (_, None) => {
                    return Err(RuntimeError::invalid_graph(format!(
                        "step {} has no parent",
                        step.id
                    )));
                }
                (_, Some(parent)) => {
                    let parent_index = node_indices.get(&parent).copied().ok_or_else(|| {
                        RuntimeError::invalid_graph(format!(
                            "parent {parent} of step {} is not in the automation",
                            step.id
                        ))
                    })?;
                    edges.push((parent_index, index, step.branch));
                }
            }
        }

        for (parent, child, branch) in edges {
            graph.add_edge(parent, child, branch);
        }

        let this = Self {
            graph,
            node_indices,
            trigger,
        };
        this.validate_children()?;

        if is_cyclic_directed(&this.graph) {
            return Err(RuntimeError::invalid_graph("cycle detected in automation graph"));
        }

        Ok(this)
    }

    fn validate_children(&self) -> RuntimeResult<()> {
        for index in self.graph.node_indices() {
            let step = &self.graph[index];
            let labels: Vec<Option<Branch>> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|edge| *edge.weight())
                .collect();

            if step.step_type == StepType::End && !labels.is_empty() {
                return Err(RuntimeError::invalid_graph(format!(
                    "END step {} must not have children",
                    step.id
                )));
            }

            if step.subtype.is_branching() {
                for branch in [Branch::Yes, Branch::No] {
                    let count = labels.iter().filter(|label| **label == Some(branch)).count();
                    if count > 1 {
                        return Err(RuntimeError::invalid_graph(format!(
                            "IF/ELSE step {} has more than one {branch} child",
                            step.id
                        )));
                    }
                }
                if labels.iter().any(Option::is_none) {
                    return Err(RuntimeError::invalid_graph(format!(
                        "children of IF/ELSE step {} must carry a YES or NO branch",
                        step.id
                    )));
                }
            } else {
                if labels.iter().any(Option::is_some) {
                    return Err(RuntimeError::invalid_graph(format!(
                        "step {} does not branch, children must not carry a label",
                        step.id
                    )));
                }
                if labels.len() > 1 {
                    return Err(RuntimeError::invalid_graph(format!(
                        "step {} has more than one child",
                        step.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Returns the number of steps.
    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the trigger step.
    pub fn trigger(&self) -> &AutomationStep {
        &self.graph[self.trigger]
    }

    /// Returns a step by id.
    pub fn step(&self, id: StepId) -> Option<&AutomationStep> {
        let index = self.node_indices.get(&id)?;
        self.graph.node_weight(*index)
    }

    /// Returns the child of `parent` on `branch` (`None` for unlabeled edges).
    pub fn child(&self, parent: StepId, branch: Option<Branch>) -> Option<&AutomationStep> {
        let index = self.node_indices.get(&parent)?;
        self.graph
            .edges_directed(*index, Direction::Outgoing)
            .find(|edge| *edge.weight() == branch)
            .map(|edge| &self.graph[edge.target()])
    }

    /// Returns the steps in topological order, trigger first.
    pub fn topological_order(&self) -> RuntimeResult<Vec<&AutomationStep>> {
        toposort(&self.graph, None)
            .map(|indices| indices.into_iter().map(|index| &self.graph[index]).collect())
            .map_err(|_| RuntimeError::invalid_graph("cycle detected in automation graph"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EmailId, TagId};
    use crate::model::StepSubtype;

    struct Fixture {
        automation_id: AutomationId,
        trigger: AutomationStep,
        rule: AutomationStep,
    }

    fn fixture() -> Fixture {
        let automation_id = AutomationId::new();
        let trigger = AutomationStep::new(automation_id, StepSubtype::TriggerApiCall);
        let rule = AutomationStep::new(automation_id, StepSubtype::RuleIfElse).with_parent(trigger.id);
        Fixture {
            automation_id,
            trigger,
            rule,
        }
    }

    #[test]
    fn test_valid_branching_graph() {
        let f = fixture();
        let yes = AutomationStep::new(f.automation_id, StepSubtype::ActionAddTag)
            .with_tag(TagId::new())
            .with_branch(f.rule.id, Branch::Yes);
        let no = AutomationStep::new(f.automation_id, StepSubtype::End)
            .with_branch(f.rule.id, Branch::No);
        let after_yes = AutomationStep::new(f.automation_id, StepSubtype::ActionSendEmail)
            .with_email(EmailId::new())
            .with_parent(yes.id);

        let graph = AutomationGraph::build([
            no.clone(),
            after_yes.clone(),
            f.trigger.clone(),
            yes.clone(),
            f.rule.clone(),
        ])
        .unwrap();

        assert_eq!(graph.step_count(), 5);
        assert_eq!(graph.trigger().id, f.trigger.id);
        assert_eq!(graph.child(f.trigger.id, None).unwrap().id, f.rule.id);
        assert_eq!(graph.child(f.rule.id, Some(Branch::Yes)).unwrap().id, yes.id);
        assert_eq!(graph.child(f.rule.id, Some(Branch::No)).unwrap().id, no.id);
        assert!(graph.child(no.id, None).is_none());

        let order = graph.topological_order().unwrap();
        assert_eq!(order[0].id, f.trigger.id);
    }

    #[test]
    fn test_rejects_two_triggers() {
        let f = fixture();
        let second = AutomationStep::new(f.automation_id, StepSubtype::TriggerContactSubscribed);
        assert!(AutomationGraph::build([f.trigger, second]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_branch() {
        let f = fixture();
        let yes = AutomationStep::new(f.automation_id, StepSubtype::End)
            .with_branch(f.rule.id, Branch::Yes);
        let also_yes = AutomationStep::new(f.automation_id, StepSubtype::End)
            .with_branch(f.rule.id, Branch::Yes);
        assert!(AutomationGraph::build([f.trigger, f.rule, yes, also_yes]).is_err());
    }

    #[test]
    fn test_rejects_unlabeled_if_else_child() {
        let f = fixture();
        let child = AutomationStep::new(f.automation_id, StepSubtype::End).with_parent(f.rule.id);
        assert!(AutomationGraph::build([f.trigger, f.rule, child]).is_err());
    }

    #[test]
    fn test_rejects_fan_out_and_end_children() {
        let f = fixture();
        let end = AutomationStep::new(f.automation_id, StepSubtype::End).with_parent(f.trigger.id);
        assert!(AutomationGraph::build([f.trigger.clone(), f.rule.clone(), end.clone()]).is_err());

        let after_end = AutomationStep::new(f.automation_id, StepSubtype::End).with_parent(end.id);
        assert!(AutomationGraph::build([f.trigger, end, after_end]).is_err());
    }

    #[test]
    fn test_rejects_foreign_parent_and_cycles() {
        let f = fixture();
        let foreign = AutomationStep::new(AutomationId::new(), StepSubtype::End)
            .with_parent(f.trigger.id);
        assert!(AutomationGraph::build([f.trigger.clone(), foreign]).is_err());

        let mut a = AutomationStep::new(f.automation_id, StepSubtype::ActionAddTag).with_tag(TagId::new());
        let b = AutomationStep::new(f.automation_id, StepSubtype::ActionRemoveTag)
            .with_tag(TagId::new())
            .with_parent(a.id);
        a.parent_id = Some(b.id);
        assert!(AutomationGraph::build([f.trigger, a, b]).is_err());
    }
}
